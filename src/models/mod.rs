//! Data models shared by the backend, connection and transaction layers.

pub mod connection;
pub mod query;

pub use connection::{DatabaseType, IsolationLevel, TransactionOptions, TransactionState};
pub use query::{
    ColumnMetadata, Compile, CompiledQuery, ExecuteResult, QueryParam, Row, Statement,
};
