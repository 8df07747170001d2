//! Error types for meterwatch-store.

use std::path::PathBuf;

/// Result type for meterwatch-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in meterwatch-store.
///
/// Any of these returned from a write means the reading was not persisted.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Meter not found in database.
    #[error("Meter not found: {0}")]
    MeterNotFound(String),

    /// Timestamp outside the representable range.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
