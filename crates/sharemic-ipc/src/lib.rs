//! sharemic IPC - Unix socket protocol and client library.
//!
//! Requests and responses are JSON documents, one per line, exchanged over a
//! Unix socket owned by the daemon.

pub mod client;
pub mod error;
pub mod messages;
pub mod server;

pub use client::IpcClient;
pub use error::{IpcError, IpcResult};
pub use messages::{ErrorInfo, Method, Request, Response};
pub use server::{IncomingRequest, IpcServer};

use std::path::PathBuf;

use directories::BaseDirs;

/// Longest accepted line on the socket, in bytes.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

const SOCKET_NAME: &str = "sharemic/daemon.sock";

/// Get the default socket path.
///
/// Uses `$XDG_RUNTIME_DIR/sharemic/daemon.sock` or falls back to
/// `/run/user/$UID/sharemic/daemon.sock`.
#[must_use]
#[allow(unsafe_code)] // libc::getuid() is safe to call
pub fn socket_path() -> PathBuf {
    if let Some(runtime_dir) = BaseDirs::new().and_then(|dirs| dirs.runtime_dir().map(PathBuf::from)) {
        runtime_dir.join(SOCKET_NAME)
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/run/user/{uid}")).join(SOCKET_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_ends_with_name() {
        assert!(socket_path().ends_with("sharemic/daemon.sock"));
    }
}
