//! Error types for `AquaSense` core library.

use thiserror::Error;

/// Result type alias using `AquaSense` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `AquaSense` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed document or collection path
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Timestamp outside the representable calendar range
    #[error("Timestamp {0} is out of range")]
    InvalidTimestamp(i64),

    /// Illegal schedule status change
    #[error("Schedule cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Access rule error
    #[error("Access rule error: {0}")]
    Rules(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
