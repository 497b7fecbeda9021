use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DocbagError>;

/// Errors raised while planning, fetching or writing partitions.
///
/// Driver errors (`Connection`, `Database`, `BulkWrite`) are produced by the
/// [`crate::store`] capability layer and travel to the caller unchanged.
#[derive(Debug, Error)]
pub enum DocbagError {
    /// The driver could not open or use a connection.
    #[error("connection error: {0}")]
    Connection(String),
    /// The driver rejected a query, aggregation or command.
    #[error("database error: {0}")]
    Database(String),
    /// A bulk insert stopped partway; `inserted` documents were written.
    #[error("bulk write failed after {inserted} inserted documents: {message}")]
    BulkWrite {
        /// Number of documents the driver reports as written.
        inserted: usize,
        /// Driver supplied failure reason.
        message: String,
    },
    /// Caller supplied an argument outside the accepted domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A filter or pipeline used an operator the driver does not understand.
    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),
    /// A task graph references a key that has no task.
    #[error("task {0} not found in graph")]
    MissingTask(String),
    /// Configuration file could not be loaded or parsed.
    #[error("config error at {path}: {message}")]
    Config {
        /// Path of the offending file.
        path: PathBuf,
        /// Parse or read failure.
        message: String,
    },
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DocbagError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        DocbagError::InvalidArgument(message.into())
    }

    pub(crate) fn database(message: impl Into<String>) -> Self {
        DocbagError::Database(message.into())
    }
}
