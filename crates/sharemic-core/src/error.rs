//! Error types for sharemic core.

use thiserror::Error;

/// Core error type for sharemic operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid filter spec: {0}")]
    InvalidSpec(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result type alias for sharemic core operations.
pub type Result<T> = std::result::Result<T, Error>;
