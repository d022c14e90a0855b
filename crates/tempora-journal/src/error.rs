//! Error types for tempora-journal

use thiserror::Error;

/// Journal error type
#[derive(Debug, Error)]
pub enum Error {
    /// Replay could not deliver a recorded batch
    #[error("Replay error: {0}")]
    Replay(String),

    /// Export error
    #[error("Export error: {0}")]
    Export(String),

    /// The network rejected an operation
    #[error("Network error: {0}")]
    Hub(#[from] tempora_hub::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for journal operations
pub type Result<T> = std::result::Result<T, Error>;
