//! PipeWire error types.

use thiserror::Error;

/// PipeWire error type.
#[derive(Debug, Error)]
pub enum PwError {
    #[error("PipeWire connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Node creation failed: {0}")]
    NodeCreationFailed(String),

    #[error("Link creation failed: {0}")]
    LinkCreationFailed(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("MainLoop error: {0}")]
    MainLoopError(String),

    #[error("Metadata error: {0}")]
    MetadataError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error(transparent)]
    Core(#[from] sharemic_core::Error),
}

/// Result type for PipeWire operations.
pub type PwResult<T> = Result<T, PwError>;
