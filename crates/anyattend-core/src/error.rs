//! Error types for `Anyattend` core library.

use thiserror::Error;

/// Result type alias using `Anyattend` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `Anyattend` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Payload does not fit the supported value shape
    #[error("Invalid payload: {0}")]
    Payload(String),

    /// Unknown command type string
    #[error("Unknown command type: {0}")]
    UnknownCommandType(String),

    /// Unknown acknowledgment status string
    #[error("Unknown ack status: {0}")]
    UnknownAckStatus(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
