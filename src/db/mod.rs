//! Database access layer.
//!
//! - `backend`: pool ownership and lifecycle
//! - `connection`: one borrowed physical connection and its query operations
//! - `transaction`: root transactions and savepoint-backed nested ones
//! - `pool`: engine-specific pools and borrowed connections
//! - `executor`: per-engine statement execution
//! - `params` / `types`: parameter binding and row decoding

#[macro_use]
pub mod macros;
pub mod backend;
pub mod connection;
pub mod executor;
pub mod params;
pub mod pool;
pub mod transaction;
pub mod types;

pub use backend::Backend;
pub use connection::Connection;
pub use pool::{DbConnection, DbPool};
pub use transaction::Transaction;
