use crate::events::KeySymbol;
use std::path::PathBuf;
use thiserror::Error;

/// Error types for recording, persisting and replaying input
#[derive(Debug, Error)]
pub enum TinytaskError {
    /// An operation was requested in a session state that does not allow it
    #[error("Invalid session transition: {0}")]
    Conflict(String),

    /// Persisted data is malformed or its timestamps are out of order
    #[error("Malformed event data: {0}")]
    Format(String),

    /// The file to load does not exist
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    /// I/O error while persisting or reading a sequence
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The host has no key-down/key-up primitive for this symbol
    #[error("Unsupported key: {0}")]
    UnsupportedKey(KeySymbol),

    /// The host failed to synthesize an input action
    #[error("Failed to synthesize input: {0}")]
    Synthesis(String),

    /// The host input subscription could not be established
    #[error("Failed to capture input: {0}")]
    Capture(String),

    /// No host input binding is available for this build
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// An async runtime was required but not available
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<serde_json::Error> for TinytaskError {
    fn from(err: serde_json::Error) -> Self {
        TinytaskError::Format(err.to_string())
    }
}

/// Result type for tinytask operations
pub type Result<T> = std::result::Result<T, TinytaskError>;
