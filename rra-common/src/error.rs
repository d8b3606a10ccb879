//! Common error types for RRA

use thiserror::Error;

/// Common result type for RRA operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the archiver and the read surface
#[derive(Error, Debug)]
pub enum Error {
    /// Persistence store failure (wraps sqlx::Error). Retryable on the next cycle.
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Attempted leg status change that the state machine forbids
    #[error("Invalid leg transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: String,
        to: String,
    },

    /// Internal error (corrupt row, serialization failure)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for transient SQLite lock contention that is worth retrying
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Store(err) => err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}
