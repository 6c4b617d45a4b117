//! Error types for the database access layer.
//!
//! Errors fall into three groups:
//! - lifecycle preconditions (an operation invoked on a backend, connection or
//!   transaction in the wrong state). These are programmer errors.
//! - driver errors, wrapped unchanged from sqlx.
//! - pool exhaustion, surfaced as [`DbError::Timeout`] once the acquire
//!   timeout elapses.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error(transparent)]
    Driver(#[from] sqlx::Error),

    #[error("Backend is not running")]
    NotConnected,

    #[error("Backend is already running")]
    AlreadyConnected,

    #[error("Connection is not acquired")]
    NotAcquired,

    #[error("Connection is already acquired")]
    AlreadyAcquired,

    #[error("Transaction error: {message} (transaction: {transaction})")]
    Transaction {
        message: String,
        /// "root" or the savepoint name
        transaction: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Invalid database URL: {message}")]
    InvalidUrl { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a transaction state error.
    pub fn transaction(message: impl Into<String>, transaction: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction: transaction.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an invalid URL error.
    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::NotConnected => Some("Call Backend::connect() first"),
            Self::NotAcquired => Some("Call Connection::acquire() first"),
            _ => None,
        }
    }

    /// SQLSTATE / engine error code reported by the driver, if any.
    pub fn sql_state(&self) -> Option<String> {
        match self {
            Self::Driver(sqlx::Error::Database(db_err)) => db_err.code().map(|c| c.to_string()),
            _ => None,
        }
    }

    /// True for errors caused by calling an operation in the wrong lifecycle state.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::AlreadyConnected
                | Self::NotAcquired
                | Self::AlreadyAcquired
                | Self::Transaction { .. }
                | Self::InvalidInput { .. }
        )
    }

    /// Check if this error is retryable. The library itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
