//! Nested transactions on one connection.
//!
//! The outermost transaction on a connection is a native `BEGIN` /
//! `COMMIT` / `ROLLBACK`. Every transaction opened inside it maps onto the
//! same flat transaction through a uniquely named savepoint, so an inner
//! failure can be undone without aborting the outer unit of work.
//!
//! A [`Transaction`] mutably borrows its [`Connection`] and dereferences to
//! it. Statements are issued through the innermost open transaction, and a
//! nested transaction borrows the one enclosing it, so scopes always close in
//! reverse order of opening.
//!
//! ```ignore
//! let mut outer = conn.begin().await?;
//! outer.execute("INSERT INTO notes (text) VALUES ('kept')").await?;
//!
//! let mut inner = outer.transaction();
//! inner.begin().await?;
//! inner.execute("INSERT INTO notes (text) VALUES ('discarded')").await?;
//! inner.rollback().await?;
//!
//! outer.commit().await?;
//! ```

use crate::db::connection::Connection;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, TransactionOptions, TransactionState};
use std::ops::{Deref, DerefMut};
use tracing::{debug, warn};

/// Prefix of generated savepoint names; keeps them apart from savepoints
/// issued directly by callers.
pub const SAVEPOINT_PREFIX: &str = "db_backends_sp_";

/// Generate a fresh savepoint name.
pub fn generate_savepoint_name() -> String {
    format!("{SAVEPOINT_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

/// One transaction scope on a connection.
///
/// Created unstarted by [`Connection::transaction`]; single use:
/// start, then exactly one of [`commit`](Self::commit) or
/// [`rollback`](Self::rollback).
pub struct Transaction<'c> {
    connection: &'c mut Connection,
    is_root: bool,
    savepoint_name: Option<String>,
    state: TransactionState,
}

impl<'c> Transaction<'c> {
    pub(crate) fn new(connection: &'c mut Connection) -> Self {
        Self {
            connection,
            is_root: false,
            savepoint_name: None,
            state: TransactionState::Unstarted,
        }
    }

    /// Whether this is the outermost transaction on its connection.
    ///
    /// Meaningful once started.
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Savepoint backing a nested transaction; `None` for the root.
    pub fn savepoint_name(&self) -> Option<&str> {
        self.savepoint_name.as_deref()
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn label(&self) -> &str {
        self.savepoint_name.as_deref().unwrap_or("root")
    }

    /// Start as root when no transaction is open on the connection, nested
    /// otherwise.
    pub async fn begin(&mut self) -> DbResult<()> {
        self.begin_with(TransactionOptions::default()).await
    }

    /// As [`begin`](Self::begin), with options for a root transaction.
    pub async fn begin_with(&mut self, options: TransactionOptions) -> DbResult<()> {
        let is_root = self.connection.transaction_depth() == 0;
        self.start(is_root, options).await
    }

    /// Start with a caller-decided form: `BEGIN` when `is_root`, otherwise
    /// `SAVEPOINT <generated name>`.
    ///
    /// The choice must agree with the connection's open transactions: a root
    /// cannot start while another transaction is open, and a nested
    /// transaction needs an enclosing one.
    pub async fn start(&mut self, is_root: bool, options: TransactionOptions) -> DbResult<()> {
        if self.state != TransactionState::Unstarted {
            return Err(DbError::transaction(
                format!("cannot start a transaction that is {:?}", self.state),
                self.label(),
            ));
        }
        let depth = self.connection.transaction_depth();
        if is_root && depth > 0 {
            return Err(DbError::transaction(
                format!("a transaction is already open on this connection (depth {depth})"),
                "root",
            ));
        }
        if !is_root && depth == 0 {
            return Err(DbError::transaction(
                "no enclosing transaction to create a savepoint in",
                "nested",
            ));
        }

        self.connection.undo_dropped().await?;
        if is_root {
            let dialect = self.connection.database_type();
            for sql in begin_statements(dialect, &options) {
                self.connection.execute_control(&sql).await?;
            }
            debug!(dialect = %dialect, isolation = ?options.isolation, "Transaction started");
        } else {
            let dialect = self.connection.database_type();
            if !dialect.supports_savepoints() {
                return Err(DbError::transaction(
                    format!("{dialect} does not support savepoints"),
                    "nested",
                ));
            }
            if options.isolation.is_some() {
                debug!("Isolation level ignored for nested transaction");
            }
            let name = generate_savepoint_name();
            self.connection
                .execute_control(&format!("SAVEPOINT {name}"))
                .await?;
            debug!(savepoint = %name, depth = depth + 1, "Savepoint created");
            self.savepoint_name = Some(name);
        }

        self.is_root = is_root;
        self.state = TransactionState::Active;
        self.connection.enter_transaction();
        Ok(())
    }

    /// `COMMIT` for the root, `RELEASE SAVEPOINT` for a nested transaction.
    pub async fn commit(mut self) -> DbResult<()> {
        let sql = match &self.savepoint_name {
            None => "COMMIT".to_string(),
            Some(name) => format!("RELEASE SAVEPOINT {name}"),
        };
        self.finish(&sql, TransactionState::Committed).await
    }

    /// `ROLLBACK` for the root, `ROLLBACK TO SAVEPOINT` for a nested
    /// transaction. The enclosing transaction stays open and usable.
    pub async fn rollback(mut self) -> DbResult<()> {
        let sql = match &self.savepoint_name {
            None => "ROLLBACK".to_string(),
            Some(name) => format!("ROLLBACK TO SAVEPOINT {name}"),
        };
        self.finish(&sql, TransactionState::RolledBack).await
    }

    async fn finish(&mut self, sql: &str, outcome: TransactionState) -> DbResult<()> {
        if self.state != TransactionState::Active {
            return Err(DbError::transaction(
                format!("cannot end a transaction that is {:?}", self.state),
                self.label(),
            ));
        }
        // On error the handle stays active and Drop abandons it.
        self.connection.undo_dropped().await?;
        self.connection.execute_control(sql).await?;
        self.state = outcome;
        self.connection.leave_transaction();
        debug!(transaction = %self.label(), state = ?outcome, "Transaction ended");
        Ok(())
    }
}

/// Statements opening a root transaction.
fn begin_statements(dialect: DatabaseType, options: &TransactionOptions) -> Vec<String> {
    match (dialect, options.isolation) {
        (DatabaseType::MySQL, Some(level)) => vec![
            format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()),
            "BEGIN".to_string(),
        ],
        (DatabaseType::PostgreSQL, Some(level)) => {
            vec![format!("BEGIN ISOLATION LEVEL {}", level.as_sql())]
        }
        (DatabaseType::SQLite, Some(level)) => {
            debug!(isolation = ?level, "SQLite transactions are serializable; isolation level ignored");
            vec!["BEGIN".to_string()]
        }
        (_, None) => vec!["BEGIN".to_string()],
    }
}

impl Deref for Transaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &*self.connection
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut *self.connection
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("is_root", &self.is_root)
            .field("savepoint_name", &self.savepoint_name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state != TransactionState::Active {
            return;
        }
        self.connection.leave_transaction();
        warn!(
            transaction = %self.label(),
            "Transaction dropped while active - call commit() or rollback()"
        );
        match self.savepoint_name.take() {
            Some(name) => self.connection.mark_savepoint_dropped(name),
            None => self.connection.mark_abandoned(),
        }
    }
}
