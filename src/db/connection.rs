//! A logical connection: at most one borrowed physical connection plus the
//! dialect needed to compile queries for it.

use crate::db::backend::Backend;
use crate::db::pool::DbConnection;
use crate::db::transaction::Transaction;
use crate::error::{DbError, DbResult};
use crate::models::{Compile, CompiledQuery, DatabaseType, ExecuteResult, Row};
use futures_util::stream::BoxStream;
use tracing::{debug, warn};

/// Handle on one physical connection borrowed from a [`Backend`]'s pool.
///
/// Created unbound by [`Backend::connection`]; [`acquire`](Self::acquire)
/// borrows a physical connection and [`release`](Self::release) hands it
/// back. Every query operation requires a bound connection.
pub struct Connection {
    backend: Backend,
    conn: Option<DbConnection>,
    /// Open transactions, root included.
    depth: usize,
    /// A root transaction was dropped while active and still needs a ROLLBACK.
    abandoned: bool,
    /// Savepoints of nested transactions dropped while active, innermost first.
    dropped_savepoints: Vec<String>,
    /// Query behind the row stream handed out by `iterate`.
    streaming: Option<CompiledQuery>,
}

impl Connection {
    pub(crate) fn new(backend: Backend) -> Self {
        Self {
            backend,
            conn: None,
            depth: 0,
            abandoned: false,
            dropped_savepoints: Vec::new(),
            streaming: None,
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        self.backend.database_type()
    }

    pub fn is_acquired(&self) -> bool {
        self.conn.is_some()
    }

    /// Number of open transactions on this connection (0 when none).
    pub fn transaction_depth(&self) -> usize {
        self.depth
    }

    /// Borrow a physical connection from the backend's pool.
    ///
    /// Waits while the pool is at capacity, failing with
    /// [`DbError::Timeout`] once the acquire timeout elapses.
    pub async fn acquire(&mut self) -> DbResult<()> {
        if self.conn.is_some() {
            return Err(DbError::AlreadyAcquired);
        }
        let pool = self.backend.pool().await?;
        let conn = pool.acquire().await?;
        debug!(dialect = %self.database_type(), "Connection acquired");
        self.conn = Some(conn);
        Ok(())
    }

    /// Return the physical connection to the pool.
    ///
    /// An abandoned root transaction is rolled back first. If that rollback
    /// fails the physical connection is closed instead of pooled, and the
    /// error is returned; the handle is unbound either way.
    pub async fn release(&mut self) -> DbResult<()> {
        if self.conn.is_none() {
            return Err(DbError::NotAcquired);
        }
        let undone = self.undo_dropped().await;
        self.depth = 0;
        self.streaming = None;
        let Some(conn) = self.conn.take() else {
            return Err(DbError::NotAcquired);
        };
        if let Err(e) = undone {
            warn!(error = %e, "Closing connection left in an unknown transaction state");
            conn.discard();
            return Err(e);
        }
        drop(conn);
        debug!(dialect = %self.database_type(), "Connection released");
        if !self.backend.is_connected().await {
            return Err(DbError::NotConnected);
        }
        Ok(())
    }

    /// Compile a query for this connection's dialect without executing it.
    pub fn compile<Q: Compile + ?Sized>(&self, query: &Q) -> DbResult<CompiledQuery> {
        let compiled = query.compile(self.database_type())?;
        debug!(sql = %compiled.log_text(), params = ?compiled.params, "Query");
        Ok(compiled)
    }

    /// Execute a query and return all rows; empty when nothing matches.
    pub async fn fetch_all<Q: Compile + ?Sized>(&mut self, query: &Q) -> DbResult<Vec<Row>> {
        self.bound()?;
        self.undo_dropped().await?;
        let compiled = self.compile(query)?;
        self.bound()?.fetch_all(&compiled).await
    }

    /// Execute a query and return its first row, or `None` when the result
    /// set is empty.
    pub async fn fetch_one<Q: Compile + ?Sized>(&mut self, query: &Q) -> DbResult<Option<Row>> {
        self.bound()?;
        self.undo_dropped().await?;
        let compiled = self.compile(query)?;
        self.bound()?.fetch_one(&compiled).await
    }

    /// Execute one statement. The insert id and the affected-row count are
    /// reported separately.
    pub async fn execute<Q: Compile + ?Sized>(&mut self, query: &Q) -> DbResult<ExecuteResult> {
        self.bound()?;
        self.undo_dropped().await?;
        let compiled = self.compile(query)?;
        self.bound()?.execute(&compiled).await
    }

    /// Execute statements in order, stopping at the first failure.
    ///
    /// No implicit transaction: statements before a failing one stay applied
    /// unless the caller opened a transaction.
    pub async fn execute_many<I>(&mut self, queries: I) -> DbResult<()>
    where
        I: IntoIterator,
        I::Item: Compile,
    {
        self.bound()?;
        self.undo_dropped().await?;
        for query in queries {
            let compiled = self.compile(&query)?;
            self.bound()?.execute(&compiled).await?;
        }
        Ok(())
    }

    /// Lazily stream the rows of a query.
    ///
    /// Rows are pulled from the driver as the stream is polled. Dropping the
    /// stream early ends the statement; calling `iterate` again re-executes it.
    ///
    /// ```ignore
    /// let mut rows = conn.iterate("SELECT id FROM notes").await?;
    /// while let Some(row) = rows.try_next().await? { /* ... */ }
    /// ```
    pub async fn iterate<'a, Q: Compile + ?Sized>(
        &'a mut self,
        query: &Q,
    ) -> DbResult<BoxStream<'a, DbResult<Row>>> {
        self.bound()?;
        self.undo_dropped().await?;
        let compiled = self.compile(query)?;

        // The stream borrows both the driver connection and the query text.
        let Self { conn, streaming, .. } = self;
        let conn = conn.as_mut().ok_or(DbError::NotAcquired)?;
        let query: &'a CompiledQuery = streaming.insert(compiled);
        Ok(conn.fetch(query))
    }

    /// New unstarted transaction on this connection. No statement is issued.
    pub fn transaction(&mut self) -> Transaction<'_> {
        Transaction::new(self)
    }

    /// Open a transaction: the root when none is open, a savepoint otherwise.
    pub async fn begin(&mut self) -> DbResult<Transaction<'_>> {
        let mut transaction = self.transaction();
        transaction.begin().await?;
        Ok(transaction)
    }

    /// The borrowed driver connection, for driver-specific use.
    ///
    /// Transaction control issued directly on it bypasses the depth counter.
    pub fn raw_connection(&mut self) -> DbResult<&mut DbConnection> {
        self.bound()
    }

    fn bound(&mut self) -> DbResult<&mut DbConnection> {
        self.conn.as_mut().ok_or(DbError::NotAcquired)
    }

    pub(crate) async fn execute_control(&mut self, sql: &str) -> DbResult<()> {
        debug!(sql = %sql, "Transaction control");
        self.bound()?.execute_control(sql).await
    }

    pub(crate) fn enter_transaction(&mut self) {
        self.depth += 1;
    }

    pub(crate) fn leave_transaction(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn mark_abandoned(&mut self) {
        self.abandoned = true;
    }

    pub(crate) fn mark_savepoint_dropped(&mut self, name: String) {
        self.dropped_savepoints.push(name);
    }

    /// Undo the work of transactions dropped while active.
    ///
    /// An abandoned root is rolled back whole. Otherwise each dropped nested
    /// transaction is rolled back to its savepoint, which is then released,
    /// leaving the enclosing transaction open. Runs before any other
    /// statement on the connection. Pending work is forgotten even on error.
    pub(crate) async fn undo_dropped(&mut self) -> DbResult<()> {
        let savepoints = std::mem::take(&mut self.dropped_savepoints);
        if self.abandoned {
            self.abandoned = false;
            self.execute_control("ROLLBACK").await?;
            debug!("Abandoned transaction rolled back");
            return Ok(());
        }
        for name in savepoints {
            self.execute_control(&format!("ROLLBACK TO SAVEPOINT {name}"))
                .await?;
            self.execute_control(&format!("RELEASE SAVEPOINT {name}"))
                .await?;
            debug!(savepoint = %name, "Dropped savepoint rolled back");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("dialect", &self.database_type())
            .field("acquired", &self.conn.is_some())
            .field("transaction_depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if !self.abandoned && self.depth == 0 && self.dropped_savepoints.is_empty() {
            // Returned to the pool by PoolConnection's own Drop.
            return;
        }

        warn!(
            transaction_depth = self.depth,
            "Connection dropped inside a transaction - call release()"
        );
        // Roll back on the runtime when there is one; otherwise close the
        // connection so an open transaction never goes back into the pool.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let mut conn = conn;
                    if let Err(e) = conn.execute_control("ROLLBACK").await {
                        warn!(error = %e, "Rollback on drop failed; closing connection");
                        conn.discard();
                    }
                });
            }
            Err(_) => conn.discard(),
        }
    }
}
