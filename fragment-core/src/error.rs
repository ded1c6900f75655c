//! Error types for the Fragment core library.

use thiserror::Error;

/// Top-level error type for core operations.
///
/// None of these cross into the proximity or conversation state machine:
/// storage failures are logged and replaced by defaults at the call site.
#[derive(Error, Debug)]
pub enum FragmentError {
    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored snapshot failed its integrity check.
    #[error("Corrupt snapshot '{key}': {reason}")]
    CorruptSnapshot {
        /// Which snapshot key.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, FragmentError>;
