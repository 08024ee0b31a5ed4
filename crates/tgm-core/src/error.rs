//! Error types for tgm-core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using tgm-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for tgm operations
#[derive(Error, Debug)]
pub enum Error {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    // Working directory errors
    #[error("Working directory does not exist: {}", .0.display())]
    DirectoryMissing(PathBuf),

    #[error("Working directory already exists: {}", .0.display())]
    DirectoryExists(PathBuf),

    // Protocol client errors
    #[error("Protocol error {code}: {message}")]
    Protocol { code: i32, message: String },

    #[error("Unexpected protocol response: {0}")]
    UnexpectedResponse(String),

    #[error("Protocol client is closed")]
    ClientClosed,

    #[error("Update stream already subscribed")]
    AlreadySubscribed,

    // Session errors
    #[error("Session failed: {0}")]
    SessionFailed(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a protocol error object
    pub fn protocol(code: i32, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Whether this error came from session disposal rather than a real failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
