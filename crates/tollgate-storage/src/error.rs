//! Storage error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error (e.g., creating directories).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing a cache entry failed part way; the entry was discarded.
    #[error("cache write for {key} failed: {source}")]
    CacheWrite {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// A report was requested for a name that is not a bare address.
    #[error("invalid report address: {0:?}")]
    InvalidReportAddress(String),

    /// The event log could not be read.
    #[error("event log {path} unreadable: {source}")]
    LogUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
