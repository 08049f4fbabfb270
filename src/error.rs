//! Error types for the Tollgate service.

use thiserror::Error;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Decision-log and roster store errors
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
