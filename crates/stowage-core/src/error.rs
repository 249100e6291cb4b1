//! Error types for stowage.

use thiserror::Error;

/// Result type alias using stowage's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for stowage operations.
///
/// Batch jobs never let these escape a record boundary; they are logged
/// with the record identifier and counted.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Blob could not be written (directory creation, disk full, permissions)
    #[error("Storage write error: {0}")]
    StorageWrite(String),

    /// Blob is missing or unreadable
    #[error("Storage read error: {0}")]
    StorageRead(String),

    /// Payload operation attempted without a configured storage root
    #[error("Storage not configured")]
    StorageNotConfigured,

    /// Storage key is not of the form `<shard>/<digest>`
    #[error("Invalid storage key: {0}")]
    InvalidStorageKey(String),

    /// Input that looked encoded could not be decoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The indexer failed to extract content
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::Encoding(e.to_string())
    }
}
