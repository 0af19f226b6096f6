//! IPC message types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request envelope sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique request ID for matching responses
    pub id: u64,
    /// The method to invoke
    pub method: Method,
}

/// Response envelope sent from daemon to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this is responding to
    pub id: u64,
    /// Result of the request
    pub result: Result<Value, ErrorInfo>,
}

impl Response {
    #[must_use]
    pub fn ok(id: u64, value: Value) -> Self {
        Self { id, result: Ok(value) }
    }

    #[must_use]
    pub fn error(id: u64, error: ErrorInfo) -> Self {
        Self { id, result: Err(error) }
    }
}

/// Error information in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code
    pub code: i32,
    /// Human-readable error message
    pub message: String,
}

impl ErrorInfo {
    /// Malformed request or filter spec
    pub const INVALID_REQUEST: i32 = 400;
    /// Failure inside the engine
    pub const INTERNAL: i32 = 500;
    /// The sound server cannot do what was asked
    pub const NOT_SUPPORTED: i32 = 501;
    /// The engine thread is gone
    pub const UNAVAILABLE: i32 = 503;

    /// Create a new error.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Methods that can be invoked via IPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum Method {
    /// List nodes that carry all of `props` (defaults apply when empty)
    ListNodes {
        #[serde(default)]
        props: Vec<String>,
    },
    /// Start routing with the given filter spec, replacing any active one.
    /// Carried as raw JSON and validated by the daemon.
    Link { spec: Value },
    /// Stop routing and destroy the virtual microphone
    Unlink,
    /// Ask whether the active sound server is PipeWire
    HasPipeWire,
    /// Request graceful shutdown
    Shutdown,
}

impl Method {
    /// Short name used in log lines.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListNodes { .. } => "list-nodes",
            Self::Link { .. } => "link",
            Self::Unlink => "unlink",
            Self::HasPipeWire => "has-pipewire",
            Self::Shutdown => "shutdown",
        }
    }
}
