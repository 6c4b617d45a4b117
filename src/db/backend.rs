//! Backend: owner of the connection pool for one database URL.

use crate::config::{BackendOptions, DatabaseUrl, PoolOptions, resolve_options};
use crate::db::connection::Connection;
use crate::db::pool::{self, DbPool};
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Owns zero or one connection pool: created by [`connect`](Self::connect),
/// closed by [`disconnect`](Self::disconnect).
///
/// Cloning is cheap; clones share the same pool.
#[derive(Clone)]
pub struct Backend {
    inner: Arc<BackendInner>,
}

struct BackendInner {
    url: DatabaseUrl,
    database_type: DatabaseType,
    pool_options: PoolOptions,
    /// Driver options not recognised as pool tunables.
    passthrough: Vec<(String, String)>,
    pool: RwLock<Option<DbPool>>,
}

impl Backend {
    /// Parse `url` and build a disconnected backend.
    pub fn new(url: &str, options: BackendOptions) -> DbResult<Self> {
        Self::from_url(url.parse()?, options)
    }

    /// Build a disconnected backend. Options given here override the same
    /// keys in the URL query.
    pub fn from_url(url: DatabaseUrl, options: BackendOptions) -> DbResult<Self> {
        let database_type = DatabaseType::from_dialect(url.dialect()).ok_or_else(|| {
            DbError::invalid_url(format!(
                "Unsupported dialect '{}' (expected mysql, mariadb, postgresql or sqlite)",
                url.dialect()
            ))
        })?;
        let (pool_options, passthrough) = resolve_options(&url, &options)?;

        Ok(Self {
            inner: Arc::new(BackendInner {
                url,
                database_type,
                pool_options,
                passthrough,
                pool: RwLock::new(None),
            }),
        })
    }

    pub fn url(&self) -> &DatabaseUrl {
        &self.inner.url
    }

    pub fn database_type(&self) -> DatabaseType {
        self.inner.database_type
    }

    /// Pool tunables resolved from the URL and backend options.
    pub fn pool_options(&self) -> &PoolOptions {
        &self.inner.pool_options
    }

    /// Whether a pool exists and has not been closed.
    pub async fn is_connected(&self) -> bool {
        self.inner
            .pool
            .read()
            .await
            .as_ref()
            .is_some_and(|pool| !pool.is_closed())
    }

    /// Create the connection pool.
    pub async fn connect(&self) -> DbResult<()> {
        // Early check for an existing pool
        if self.is_connected().await {
            return Err(DbError::AlreadyConnected);
        }

        info!(
            url = %self.inner.url,
            dialect = %self.inner.database_type,
            "Connecting to database"
        );

        let pool = pool::create_pool(
            &self.inner.url,
            self.inner.database_type,
            &self.inner.pool_options,
            &self.inner.passthrough,
        )
        .await?;

        // Re-check after async work; a concurrent connect may have won.
        let duplicate = {
            let mut guard = self.inner.pool.write().await;
            if guard.as_ref().is_some_and(|open| !open.is_closed()) {
                Some(pool)
            } else {
                *guard = Some(pool);
                None
            }
        };
        if let Some(pool) = duplicate {
            pool.close().await;
            return Err(DbError::AlreadyConnected);
        }

        info!(url = %self.inner.url, "Connected successfully");
        Ok(())
    }

    /// Close the pool, waiting for borrowed connections to be returned.
    pub async fn disconnect(&self) -> DbResult<()> {
        let pool = self
            .inner
            .pool
            .write()
            .await
            .take()
            .ok_or(DbError::NotConnected)?;

        info!(url = %self.inner.url, "Disconnecting from database");
        pool.close().await;
        info!(url = %self.inner.url, "Disconnected");
        Ok(())
    }

    /// New unbound connection handle. No I/O.
    pub fn connection(&self) -> Connection {
        Connection::new(self.clone())
    }

    /// New connection handle that has already acquired a physical connection.
    pub async fn acquire(&self) -> DbResult<Connection> {
        let mut connection = self.connection();
        connection.acquire().await?;
        Ok(connection)
    }

    pub(crate) async fn pool(&self) -> DbResult<DbPool> {
        self.inner
            .pool
            .read()
            .await
            .clone()
            .ok_or(DbError::NotConnected)
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("url", &self.inner.url)
            .field("database_type", &self.inner.database_type)
            .field("pool_options", &self.inner.pool_options)
            .finish_non_exhaustive()
    }
}
