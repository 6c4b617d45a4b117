//! Uniform async access to MySQL, PostgreSQL and SQLite.
//!
//! A [`Backend`] owns a connection pool for one [`DatabaseUrl`]. A
//! [`Connection`] borrows one physical connection from it and runs queries,
//! and a [`Transaction`] maps nested transaction scopes onto savepoints
//! inside a single native transaction.
//!
//! ```ignore
//! let backend = Backend::new("sqlite:///app.db", BackendOptions::new())?;
//! backend.connect().await?;
//!
//! let mut conn = backend.acquire().await?;
//! let mut tx = conn.begin().await?;
//! tx.execute(&Statement::new("INSERT INTO notes (text) VALUES (:text)")
//!     .bind_named("text", "hello"))
//!     .await?;
//! tx.commit().await?;
//! conn.release().await?;
//!
//! backend.disconnect().await?;
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{BackendOptions, DatabaseUrl, PoolOptions};
pub use db::{Backend, Connection, DbConnection, Transaction};
pub use error::{DbError, DbResult};
pub use models::{
    ColumnMetadata, Compile, CompiledQuery, DatabaseType, ExecuteResult, IsolationLevel,
    QueryParam, Row, Statement, TransactionOptions, TransactionState,
};
