//! Decoding of driver rows into [`Row`] values.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! Column metadata is read once per result set and shared by every row.

use crate::models::{ColumnMetadata, DatabaseType, Row as DecodedRow};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};
use std::sync::Arc;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Temporal,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "interval" {
        return TypeCategory::Unknown;
    }

    // Before the integer check: TINYTEXT, TINYBLOB and POINT contain its markers
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    if (lower.contains("int") && lower != "point") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.starts_with("timestamp")
        || lower.starts_with("datetime")
        || lower == "date"
        || lower == "time"
        || lower == "timetz"
    {
        return TypeCategory::Temporal;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Raw DECIMAL/NUMERIC value kept as its exact textual representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Shared value helpers
// =============================================================================

/// Binary data as a base64 string.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Temporal values as ISO 8601 text. Tries the zoned form first.
macro_rules! decode_temporal {
    ($row:expr, $idx:expr) => {{
        use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
        if let Ok(v) = $row.try_get::<Option<DateTime<Utc>>, _>($idx) {
            v.map(|t| JsonValue::String(t.to_rfc3339()))
                .unwrap_or(JsonValue::Null)
        } else if let Ok(v) = $row.try_get::<Option<NaiveDateTime>, _>($idx) {
            v.map(|t| JsonValue::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
                .unwrap_or(JsonValue::Null)
        } else if let Ok(v) = $row.try_get::<Option<NaiveDate>, _>($idx) {
            v.map(|d| JsonValue::String(d.to_string()))
                .unwrap_or(JsonValue::Null)
        } else if let Ok(v) = $row.try_get::<Option<NaiveTime>, _>($idx) {
            v.map(|t| JsonValue::String(t.to_string()))
                .unwrap_or(JsonValue::Null)
        } else {
            $row.try_get::<Option<String>, _>($idx)
                .ok()
                .flatten()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null)
        }
    }};
}

// =============================================================================
// Row decoding
// =============================================================================

/// Conversion of a driver row into a [`DecodedRow`].
pub trait DecodeRow {
    /// Column description of the result set this row belongs to.
    fn column_metadata(&self) -> Arc<[ColumnMetadata]>;

    /// Decode every column, sharing `columns` with the other rows.
    fn decode(&self, columns: Arc<[ColumnMetadata]>) -> DecodedRow;
}

fn column_metadata_of<R: Row>(row: &R) -> Arc<[ColumnMetadata]> {
    row.columns()
        .iter()
        .map(|col| {
            ColumnMetadata::new(
                col.name(),
                col.type_info().name(),
                !col.type_info().is_null(),
            )
        })
        .collect::<Vec<_>>()
        .into()
}

impl DecodeRow for MySqlRow {
    fn column_metadata(&self) -> Arc<[ColumnMetadata]> {
        column_metadata_of(self)
    }

    fn decode(&self, columns: Arc<[ColumnMetadata]>) -> DecodedRow {
        let values = columns
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(&col.type_name, DatabaseType::MySQL);
                mysql::decode_column(self, idx, category)
            })
            .collect();
        DecodedRow::new(columns, values)
    }
}

impl DecodeRow for PgRow {
    fn column_metadata(&self) -> Arc<[ColumnMetadata]> {
        column_metadata_of(self)
    }

    fn decode(&self, columns: Arc<[ColumnMetadata]>) -> DecodedRow {
        let values = columns
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(&col.type_name, DatabaseType::PostgreSQL);
                postgres::decode_column(self, idx, category)
            })
            .collect();
        DecodedRow::new(columns, values)
    }
}

impl DecodeRow for SqliteRow {
    fn column_metadata(&self) -> Arc<[ColumnMetadata]> {
        column_metadata_of(self)
    }

    fn decode(&self, columns: Arc<[ColumnMetadata]>) -> DecodedRow {
        let values = columns
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(&col.type_name, DatabaseType::SQLite);
                sqlite::decode_column(self, idx, category)
            })
            .collect();
        DecodedRow::new(columns, values)
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

/// Decode column `idx` as `T`, mapping NULL and decode failures to JSON null.
fn decode_as<'r, R, T>(row: &'r R, idx: usize, to_json: impl FnOnce(T) -> JsonValue) -> JsonValue
where
    R: Row,
    usize: sqlx::ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(idx)
        .ok()
        .flatten()
        .map(to_json)
        .unwrap_or(JsonValue::Null)
}

fn int_json<T: Into<serde_json::Number>>(v: T) -> JsonValue {
    JsonValue::Number(v.into())
}

fn binary_json(v: Vec<u8>) -> JsonValue {
    encode_binary(&v)
}

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_as(row, idx, |v: RawDecimal| JsonValue::String(v.0)),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_as(row, idx, JsonValue::Bool),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_as(row, idx, binary_json),
            TypeCategory::Json => decode_as(row, idx, |v: JsonValue| v),
            TypeCategory::Temporal => decode_temporal!(row, idx),
            _ => decode_text(row, idx),
        }
    }

    /// Signed first, then unsigned for `UNSIGNED` columns.
    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<i64>, _>(idx) {
            Ok(Some(v)) => int_json(v),
            Ok(None) => JsonValue::Null,
            Err(_) => decode_as(row, idx, int_json::<u64>),
        }
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<f64>, _>(idx) {
            Ok(v) => v.map(float_value).unwrap_or(JsonValue::Null),
            Err(_) => decode_as(row, idx, |v: f32| float_value(f64::from(v))),
        }
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(JsonValue::String).unwrap_or(JsonValue::Null);
        }
        // VARBINARY-backed strings (e.g. some information_schema columns)
        decode_as(row, idx, |v: Vec<u8>| match String::from_utf8(v) {
            Ok(s) => JsonValue::String(s),
            Err(e) => encode_binary(e.as_bytes()),
        })
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_as(row, idx, JsonValue::Bool),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_as(row, idx, binary_json),
            TypeCategory::Json => decode_as(row, idx, |v: JsonValue| v),
            TypeCategory::Uuid => decode_as(row, idx, |u: sqlx::types::Uuid| {
                JsonValue::String(u.to_string())
            }),
            TypeCategory::Temporal => decode_temporal!(row, idx),
            _ => decode_as(row, idx, JsonValue::String),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(v) => v.map(|d| JsonValue::String(d.0)).unwrap_or(JsonValue::Null),
            Err(e) => {
                tracing::error!("Failed to decode NUMERIC: {:?}", e);
                JsonValue::Null
            }
        }
    }

    /// Postgres integers are strictly typed: INT2, INT4 or INT8.
    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        let type_name = row.column(idx).type_info().name();
        match type_name {
            "INT2" | "SMALLINT" | "SMALLSERIAL" => decode_as(row, idx, int_json::<i16>),
            "INT4" | "INT" | "INTEGER" | "SERIAL" => decode_as(row, idx, int_json::<i32>),
            _ => decode_as(row, idx, int_json::<i64>),
        }
    }

    fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
        match row.column(idx).type_info().name() {
            "FLOAT4" | "REAL" => decode_as(row, idx, |v: f32| float_value(f64::from(v))),
            _ => decode_as(row, idx, float_value),
        }
    }
}

mod sqlite {
    use super::*;
    use sqlx::ValueRef;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Integer => decode_as(row, idx, int_json::<i64>),
            TypeCategory::Boolean => decode_as(row, idx, JsonValue::Bool),
            TypeCategory::Float | TypeCategory::Decimal => decode_as(row, idx, float_value),
            TypeCategory::Binary => decode_as(row, idx, binary_json),
            // JSON columns hold text
            TypeCategory::Json => decode_as(row, idx, |v: String| {
                serde_json::from_str(&v).unwrap_or(JsonValue::String(v))
            }),
            TypeCategory::Text | TypeCategory::Temporal => decode_as(row, idx, JsonValue::String),
            _ => decode_by_storage_class(row, idx),
        }
    }

    /// Expression columns carry no declared type; use the value's storage class.
    fn decode_by_storage_class(row: &SqliteRow, idx: usize) -> JsonValue {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return JsonValue::Null,
            Ok(raw) => raw.type_info().name().to_uppercase(),
            Err(_) => return JsonValue::Null,
        };
        match storage.as_str() {
            "INTEGER" => decode_as(row, idx, int_json::<i64>),
            "REAL" => decode_as(row, idx, float_value),
            "BLOB" => decode_as(row, idx, binary_json),
            _ => decode_as(row, idx, JsonValue::String),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("TINYINT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INTERVAL", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::PostgreSQL),
            TypeCategory::Decimal
        );
        // SQLite NUMERIC is a float
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        for name in ["TIMESTAMPTZ", "TIMESTAMP", "DATETIME", "DATE", "TIME"] {
            assert_eq!(
                categorize_type(name, DatabaseType::PostgreSQL),
                TypeCategory::Temporal,
                "{name}"
            );
        }
    }

    #[test]
    fn test_categorize_type_other() {
        assert_eq!(
            categorize_type("jsonb", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("BYTEA", DatabaseType::PostgreSQL),
            TypeCategory::Binary
        );
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySQL),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("NULL", DatabaseType::SQLite),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_markers_inside_other_names() {
        assert_eq!(
            categorize_type("TINYTEXT", DatabaseType::MySQL),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("TINYBLOB", DatabaseType::MySQL),
            TypeCategory::Binary
        );
        assert_eq!(
            categorize_type("POINT", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_encode_binary() {
        assert_eq!(
            encode_binary(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(
            encode_binary(&[0xFF, 0xFE, 0x00, 0x01]),
            JsonValue::String("//4AAQ==".to_string())
        );
        assert_eq!(encode_binary(&[]), JsonValue::String(String::new()));
    }

    #[test]
    fn test_non_finite_float_as_string() {
        assert_eq!(float_value(1.5), serde_json::json!(1.5));
        assert_eq!(float_value(f64::NAN), JsonValue::String("NaN".to_string()));
    }
}
