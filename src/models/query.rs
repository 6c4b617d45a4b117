//! Query-related data models.
//!
//! This module defines the compilation contract between abstract queries and
//! the connection layer ([`Compile`] / [`CompiledQuery`]), a small
//! [`Statement`] builder, and the row and execution result types handed back
//! to callers.

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    /// JSON document
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<JsonValue> for QueryParam {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A query translated for one engine: statement text plus ordered parameters.
///
/// Produced without touching the database; the connection layer hands it to
/// the driver unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<QueryParam>,
    pub dialect: DatabaseType,
}

impl CompiledQuery {
    /// Statement text with no parameters.
    pub fn raw(sql: impl Into<String>, dialect: DatabaseType) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            dialect,
        }
    }

    /// Statement text with newlines collapsed, for single-line log output.
    pub fn log_text(&self) -> String {
        self.sql.replace(" \n", " ").replace('\n', " ")
    }
}

/// Translation of an abstract query into engine-specific text and parameters.
pub trait Compile {
    fn compile(&self, dialect: DatabaseType) -> DbResult<CompiledQuery>;
}

impl Compile for str {
    fn compile(&self, dialect: DatabaseType) -> DbResult<CompiledQuery> {
        Ok(CompiledQuery::raw(self, dialect))
    }
}

impl Compile for String {
    fn compile(&self, dialect: DatabaseType) -> DbResult<CompiledQuery> {
        self.as_str().compile(dialect)
    }
}

impl Compile for CompiledQuery {
    fn compile(&self, dialect: DatabaseType) -> DbResult<CompiledQuery> {
        if self.dialect != dialect {
            return Err(DbError::invalid_input(format!(
                "Query was compiled for {} but the connection is {}",
                self.dialect, dialect
            )));
        }
        Ok(self.clone())
    }
}

impl<T: Compile + ?Sized> Compile for &T {
    fn compile(&self, dialect: DatabaseType) -> DbResult<CompiledQuery> {
        (**self).compile(dialect)
    }
}

/// SQL text with bound parameters.
///
/// Parameters are either positional (`bind`), in which case the text must
/// already use the engine's placeholder syntax, or named (`bind_named`), in
/// which case `:name` markers are rewritten to the engine's placeholders at
/// compile time. The two styles cannot be mixed in one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    sql: String,
    positional: Vec<QueryParam>,
    named: BTreeMap<String, QueryParam>,
}

impl Statement {
    /// Create a statement with no parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            positional: Vec::new(),
            named: BTreeMap::new(),
        }
    }

    /// Append a positional parameter.
    pub fn bind(mut self, param: impl Into<QueryParam>) -> Self {
        self.positional.push(param.into());
        self
    }

    /// Set the value of the named parameter `:name`.
    pub fn bind_named(mut self, name: impl Into<String>, param: impl Into<QueryParam>) -> Self {
        self.named.insert(name.into(), param.into());
        self
    }

    /// The statement text as written.
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl Compile for Statement {
    fn compile(&self, dialect: DatabaseType) -> DbResult<CompiledQuery> {
        if self.named.is_empty() {
            return Ok(CompiledQuery {
                sql: self.sql.clone(),
                params: self.positional.clone(),
                dialect,
            });
        }
        if !self.positional.is_empty() {
            return Err(DbError::invalid_input(
                "Statement mixes positional and named parameters",
            ));
        }
        let (sql, params) = rewrite_named_params(&self.sql, &self.named, dialect)?;
        Ok(CompiledQuery {
            sql,
            params,
            dialect,
        })
    }
}

/// Replace `:name` markers outside quoted text with positional placeholders.
///
/// `::` (Postgres casts) is left alone. A marker with no bound value is an error.
fn rewrite_named_params(
    sql: &str,
    named: &BTreeMap<String, QueryParam>,
    dialect: DatabaseType,
) -> DbResult<(String, Vec<QueryParam>)> {
    let mut out = String::with_capacity(sql.len());
    let mut params = Vec::new();
    let mut quote: Option<char> = None;
    let mut chars = sql.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
            }
            ':' => match chars.peek().copied() {
                Some((_, ':')) => {
                    out.push_str("::");
                    chars.next();
                }
                Some((start, next)) if next.is_ascii_alphabetic() || next == '_' => {
                    let mut end = start;
                    while let Some(&(i, ch)) = chars.peek() {
                        if !(ch.is_ascii_alphanumeric() || ch == '_') {
                            break;
                        }
                        end = i + ch.len_utf8();
                        chars.next();
                    }
                    let name = &sql[start..end];
                    let value = named.get(name).ok_or_else(|| {
                        DbError::invalid_input(format!("No value bound for parameter :{name}"))
                    })?;
                    params.push(value.clone());
                    out.push_str(&dialect.placeholder(params.len()));
                }
                _ => out.push(c),
            },
            _ => out.push(c),
        }
    }

    Ok((out, params))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Database-specific type (e.g., "int8", "varchar", "TEXT")
    pub type_name: String,
    pub nullable: bool,
}

impl ColumnMetadata {
    /// Create new column metadata.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
        }
    }
}

/// One decoded result row.
///
/// Column metadata is shared between all rows of one result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[ColumnMetadata]>,
    values: Vec<JsonValue>,
}

impl Row {
    pub fn new(columns: Arc<[ColumnMetadata]>, values: Vec<JsonValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Value of the first column named `name`.
    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_index(&self, idx: usize) -> Option<&JsonValue> {
        self.values.get(idx)
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    pub fn values(&self) -> &[JsonValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Convert to a JSON object keyed by column name.
    pub fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(col, value)| (col.name.clone(), value.clone()))
            .collect()
    }
}

/// Outcome of a single mutating statement.
///
/// The engine-assigned id and the affected-row count are kept apart; engines
/// that do not report ids (or report zero) leave `last_insert_id` empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub rows_affected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
}

impl ExecuteResult {
    pub fn new(rows_affected: u64, last_insert_id: Option<i64>) -> Self {
        Self {
            rows_affected,
            last_insert_id: last_insert_id.filter(|id| *id != 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_types() {
        assert!(QueryParam::Null.is_null());
        assert!(!QueryParam::Bool(true).is_null());
        assert_eq!(QueryParam::Int(42).type_name(), "int");
        assert_eq!(QueryParam::from("hello").type_name(), "string");
        assert_eq!(QueryParam::from(None::<i64>), QueryParam::Null);
        assert_eq!(QueryParam::from(Some(7)), QueryParam::Int(7));
    }

    #[test]
    fn test_raw_text_compiles_to_itself() {
        let compiled = "SELECT 1".compile(DatabaseType::SQLite).unwrap();
        assert_eq!(compiled.sql, "SELECT 1");
        assert!(compiled.params.is_empty());
        assert_eq!(compiled.dialect, DatabaseType::SQLite);
    }

    #[test]
    fn test_positional_statement() {
        let stmt = Statement::new("SELECT * FROM notes WHERE id = ? AND done = ?")
            .bind(1)
            .bind(false);
        let compiled = stmt.compile(DatabaseType::MySQL).unwrap();
        assert_eq!(compiled.sql, stmt.sql());
        assert_eq!(
            compiled.params,
            vec![QueryParam::Int(1), QueryParam::Bool(false)]
        );
    }

    #[test]
    fn test_named_params_rewritten_per_dialect() {
        let stmt = Statement::new("UPDATE notes SET text = :text WHERE id = :id")
            .bind_named("id", 3)
            .bind_named("text", "hi");

        let pg = stmt.compile(DatabaseType::PostgreSQL).unwrap();
        assert_eq!(pg.sql, "UPDATE notes SET text = $1 WHERE id = $2");
        assert_eq!(
            pg.params,
            vec![QueryParam::String("hi".into()), QueryParam::Int(3)]
        );

        let my = stmt.compile(DatabaseType::MySQL).unwrap();
        assert_eq!(my.sql, "UPDATE notes SET text = ? WHERE id = ?");
    }

    #[test]
    fn test_named_params_skip_quotes_and_casts() {
        let stmt =
            Statement::new("SELECT ':skip', id::text FROM t WHERE id = :id").bind_named("id", 1);
        let compiled = stmt.compile(DatabaseType::PostgreSQL).unwrap();
        assert_eq!(compiled.sql, "SELECT ':skip', id::text FROM t WHERE id = $1");
        assert_eq!(compiled.params.len(), 1);
    }

    #[test]
    fn test_repeated_named_param() {
        let stmt = Statement::new("SELECT :v + :v").bind_named("v", 2);
        let compiled = stmt.compile(DatabaseType::SQLite).unwrap();
        assert_eq!(compiled.sql, "SELECT ? + ?");
        assert_eq!(compiled.params, vec![QueryParam::Int(2), QueryParam::Int(2)]);
    }

    #[test]
    fn test_missing_named_param() {
        let stmt = Statement::new("SELECT :a, :b").bind_named("a", 1);
        let err = stmt.compile(DatabaseType::SQLite).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert!(err.to_string().contains(":b"));
    }

    #[test]
    fn test_mixed_params_rejected() {
        let stmt = Statement::new("SELECT ?, :a").bind(1).bind_named("a", 2);
        assert!(stmt.compile(DatabaseType::SQLite).is_err());
    }

    #[test]
    fn test_compiled_query_dialect_checked() {
        let compiled = CompiledQuery::raw("SELECT 1", DatabaseType::MySQL);
        assert!(compiled.compile(DatabaseType::MySQL).is_ok());
        assert!(compiled.compile(DatabaseType::PostgreSQL).is_err());
    }

    #[test]
    fn test_log_text_collapses_newlines() {
        let compiled = CompiledQuery::raw("SELECT a, \nb\nFROM t", DatabaseType::SQLite);
        assert_eq!(compiled.log_text(), "SELECT a, b FROM t");
    }

    #[test]
    fn test_row_access() {
        let columns: Arc<[ColumnMetadata]> = vec![
            ColumnMetadata::new("id", "INTEGER", false),
            ColumnMetadata::new("name", "TEXT", true),
        ]
        .into();
        let row = Row::new(columns, vec![JsonValue::from(1), JsonValue::Null]);
        assert_eq!(row.get("id"), Some(&JsonValue::from(1)));
        assert_eq!(row.get("name"), Some(&JsonValue::Null));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.get_index(0), Some(&JsonValue::from(1)));
        assert_eq!(row.len(), 2);
        let map = row.to_json_map();
        assert_eq!(map["name"], JsonValue::Null);
    }

    #[test]
    fn test_execute_result_zero_id_is_absent() {
        assert_eq!(ExecuteResult::new(3, Some(0)).last_insert_id, None);
        assert_eq!(ExecuteResult::new(1, Some(42)).last_insert_id, Some(42));
        assert_eq!(ExecuteResult::new(2, None).rows_affected, 2);
    }
}
