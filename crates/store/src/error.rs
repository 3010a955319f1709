//! Store error types.

use thiserror::Error;

/// Store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database driver error (query, pool, or transaction failure).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Initial connection to the database failed.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
