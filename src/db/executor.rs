//! Statement execution on a borrowed physical connection.
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific fetch and execute
//! - `postgres`: PostgreSQL-specific fetch and execute
//! - `sqlite`: SQLite-specific fetch and execute
//!
//! Each submodule opens one sqlx row stream (or execute future) per statement.
//! That stream is the statement's cursor: it is dropped on every exit path,
//! so the driver always reclaims the statement state, including when the
//! caller's future is cancelled.

use crate::db::params;
use crate::db::pool::DbConnection;
use crate::db::types::DecodeRow;
use crate::error::DbResult;
use crate::models::{ColumnMetadata, CompiledQuery, ExecuteResult, Row};
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use sqlx::Executor;
use std::sync::Arc;

impl DbConnection {
    /// Run a query and decode every row.
    pub(crate) async fn fetch_all(&mut self, query: &CompiledQuery) -> DbResult<Vec<Row>> {
        match self {
            DbConnection::MySql(conn) => collect_rows(mysql::fetch(conn, query)).await,
            DbConnection::Postgres(conn) => collect_rows(postgres::fetch(conn, query)).await,
            DbConnection::SQLite(conn) => collect_rows(sqlite::fetch(conn, query)).await,
        }
    }

    /// Run a query and decode the first row, if any.
    pub(crate) async fn fetch_one(&mut self, query: &CompiledQuery) -> DbResult<Option<Row>> {
        match self {
            DbConnection::MySql(conn) => first_row(mysql::fetch(conn, query)).await,
            DbConnection::Postgres(conn) => first_row(postgres::fetch(conn, query)).await,
            DbConnection::SQLite(conn) => first_row(sqlite::fetch(conn, query)).await,
        }
    }

    /// Lazily decoded rows, pulled from the driver as the stream is polled.
    pub(crate) fn fetch<'a>(
        &'a mut self,
        query: &'a CompiledQuery,
    ) -> BoxStream<'a, DbResult<Row>> {
        match self {
            DbConnection::MySql(conn) => decode_stream(mysql::fetch(conn, query)),
            DbConnection::Postgres(conn) => decode_stream(postgres::fetch(conn, query)),
            DbConnection::SQLite(conn) => decode_stream(sqlite::fetch(conn, query)),
        }
    }

    /// Run a single statement that returns no rows.
    pub(crate) async fn execute(&mut self, query: &CompiledQuery) -> DbResult<ExecuteResult> {
        match self {
            DbConnection::MySql(conn) => mysql::execute(conn, query).await,
            DbConnection::Postgres(conn) => postgres::execute(conn, query).await,
            DbConnection::SQLite(conn) => sqlite::execute(conn, query).await,
        }
    }

    /// Run transaction control text (BEGIN, SAVEPOINT, ...) outside the
    /// prepared-statement path.
    pub(crate) async fn execute_control(&mut self, sql: &str) -> DbResult<()> {
        impl_db_dispatch!(DbConnection, self, {
            MySql(conn) => (&mut **conn).execute(sql).await.map(|_| ())?,
            Postgres(conn) => (&mut **conn).execute(sql).await.map(|_| ())?,
            SQLite(conn) => (&mut **conn).execute(sql).await.map(|_| ())?,
        });
        Ok(())
    }
}

// =============================================================================
// Common Helper Functions
// =============================================================================

fn decode_rows<R: DecodeRow>(rows: Vec<R>) -> Vec<Row> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let columns = first.column_metadata();
    rows.iter().map(|r| r.decode(Arc::clone(&columns))).collect()
}

async fn collect_rows<R: DecodeRow>(
    stream: BoxStream<'_, sqlx::Result<R>>,
) -> DbResult<Vec<Row>> {
    let rows: Vec<R> = stream.try_collect().await?;
    Ok(decode_rows(rows))
}

async fn first_row<R: DecodeRow>(
    mut stream: BoxStream<'_, sqlx::Result<R>>,
) -> DbResult<Option<Row>> {
    let row = stream.try_next().await?;
    Ok(row.map(|r| {
        let columns = r.column_metadata();
        r.decode(columns)
    }))
}

fn decode_stream<'a, R>(stream: BoxStream<'a, sqlx::Result<R>>) -> BoxStream<'a, DbResult<Row>>
where
    R: DecodeRow + Send + 'a,
{
    let mut columns: Option<Arc<[ColumnMetadata]>> = None;
    stream
        .map(move |result| {
            let row = result?;
            let columns = Arc::clone(columns.get_or_insert_with(|| row.column_metadata()));
            Ok(row.decode(columns))
        })
        .boxed()
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// When a statement has no parameters it is sent as raw SQL, which also allows
// statements the engine refuses to prepare.

mod mysql {
    use super::*;
    use sqlx::MySql;
    use sqlx::mysql::MySqlRow;
    use sqlx::pool::PoolConnection;

    pub fn fetch<'a>(
        conn: &'a mut PoolConnection<MySql>,
        query: &'a CompiledQuery,
    ) -> BoxStream<'a, sqlx::Result<MySqlRow>> {
        if query.params.is_empty() {
            (&mut **conn).fetch(query.sql.as_str())
        } else {
            params::mysql_query(&query.sql, &query.params).fetch(&mut **conn)
        }
    }

    pub async fn execute(
        conn: &mut PoolConnection<MySql>,
        query: &CompiledQuery,
    ) -> DbResult<ExecuteResult> {
        let result = if query.params.is_empty() {
            (&mut **conn).execute(query.sql.as_str()).await?
        } else {
            params::mysql_query(&query.sql, &query.params)
                .execute(&mut **conn)
                .await?
        };
        Ok(ExecuteResult::new(
            result.rows_affected(),
            i64::try_from(result.last_insert_id()).ok(),
        ))
    }
}

mod postgres {
    use super::*;
    use sqlx::Postgres;
    use sqlx::pool::PoolConnection;
    use sqlx::postgres::PgRow;

    pub fn fetch<'a>(
        conn: &'a mut PoolConnection<Postgres>,
        query: &'a CompiledQuery,
    ) -> BoxStream<'a, sqlx::Result<PgRow>> {
        if query.params.is_empty() {
            (&mut **conn).fetch(query.sql.as_str())
        } else {
            params::postgres_query(&query.sql, &query.params).fetch(&mut **conn)
        }
    }

    /// PostgreSQL reports no insert id; use `RETURNING` to read one.
    pub async fn execute(
        conn: &mut PoolConnection<Postgres>,
        query: &CompiledQuery,
    ) -> DbResult<ExecuteResult> {
        let result = if query.params.is_empty() {
            (&mut **conn).execute(query.sql.as_str()).await?
        } else {
            params::postgres_query(&query.sql, &query.params)
                .execute(&mut **conn)
                .await?
        };
        Ok(ExecuteResult::new(result.rows_affected(), None))
    }
}

mod sqlite {
    use super::*;
    use sqlx::Sqlite;
    use sqlx::pool::PoolConnection;
    use sqlx::sqlite::SqliteRow;

    pub fn fetch<'a>(
        conn: &'a mut PoolConnection<Sqlite>,
        query: &'a CompiledQuery,
    ) -> BoxStream<'a, sqlx::Result<SqliteRow>> {
        if query.params.is_empty() {
            (&mut **conn).fetch(query.sql.as_str())
        } else {
            params::sqlite_query(&query.sql, &query.params).fetch(&mut **conn)
        }
    }

    /// SQLite keeps the last rowid per connection and UPDATE or DELETE leave
    /// it untouched, so an id is reported only when this statement moved it.
    pub async fn execute(
        conn: &mut PoolConnection<Sqlite>,
        query: &CompiledQuery,
    ) -> DbResult<ExecuteResult> {
        let before: i64 = sqlx::query_scalar("SELECT last_insert_rowid()")
            .fetch_one(&mut **conn)
            .await?;
        let result = if query.params.is_empty() {
            (&mut **conn).execute(query.sql.as_str()).await?
        } else {
            params::sqlite_query(&query.sql, &query.params)
                .execute(&mut **conn)
                .await?
        };
        let rowid = result.last_insert_rowid();
        let inserted = result.rows_affected() > 0 && rowid != before;
        Ok(ExecuteResult::new(
            result.rows_affected(),
            inserted.then_some(rowid),
        ))
    }
}
