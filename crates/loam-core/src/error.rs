//! Error types for loam-core

use thiserror::Error;

/// Result type alias using loam-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the embedded store and local bookkeeping.
///
/// Every variant here is a storage-layer failure: callers must surface it
/// rather than swallow it, since it indicates possible data loss.
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity or queue entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A thread panicked while holding the store lock
    #[error("Store lock poisoned")]
    LockPoisoned,
}
