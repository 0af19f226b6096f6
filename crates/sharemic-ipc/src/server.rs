//! IPC server implementation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, warn};

use crate::MAX_LINE_LENGTH;
use crate::error::IpcResult;
use crate::messages::{ErrorInfo, Request, Response};

/// A decoded request, tagged with its client and the way back to it.
pub type IncomingRequest = (u64, Request, mpsc::Sender<Response>);

/// IPC server that listens for client connections.
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
    next_client_id: AtomicU64,
    request_tx: mpsc::Sender<IncomingRequest>,
}

impl IpcServer {
    /// Create a new IPC server bound to the given socket path.
    ///
    /// # Errors
    /// Returns an error if the socket cannot be created.
    pub async fn bind(socket_path: &Path) -> IpcResult<(Self, mpsc::Receiver<IncomingRequest>)> {
        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Stale socket from a previous run
        if socket_path.exists() {
            tokio::fs::remove_file(socket_path).await?;
        }

        let listener = UnixListener::bind(socket_path)?;
        info!(?socket_path, "IPC server listening");

        let (request_tx, request_rx) = mpsc::channel(64);

        Ok((
            Self {
                listener,
                path: socket_path.to_path_buf(),
                next_client_id: AtomicU64::new(1),
                request_tx,
            },
            request_rx,
        ))
    }

    /// Path of the bound socket.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
                    info!(client_id, "Client connected");

                    let request_tx = self.request_tx.clone();

                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_client(client_id, stream, request_tx).await {
                            error!(client_id, error = %e, "Client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                }
            }
        }
    }

    async fn handle_client(
        client_id: u64,
        stream: UnixStream,
        request_tx: mpsc::Sender<IncomingRequest>,
    ) -> IpcResult<()> {
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let (response_tx, mut response_rx) = mpsc::channel::<Response>(16);

        loop {
            tokio::select! {
                line = framed.next() => {
                    match line {
                        None => {
                            debug!(client_id, "Client disconnected");
                            break;
                        }
                        Some(Ok(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }

                            match serde_json::from_str::<Request>(&line) {
                                Ok(request) => {
                                    debug!(client_id, request_id = request.id, method = request.method.name(), "Received request");
                                    if request_tx.send((client_id, request, response_tx.clone())).await.is_err() {
                                        warn!(client_id, "Request handler is gone");
                                        break;
                                    }
                                }
                                Err(e) => {
                                    warn!(client_id, error = %e, "Invalid request format");
                                    let response = Response::error(
                                        request_id_of(&line),
                                        ErrorInfo::new(ErrorInfo::INVALID_REQUEST, format!("Invalid request: {e}")),
                                    );
                                    framed.send(serde_json::to_string(&response)?).await?;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            error!(client_id, error = %e, "Read error");
                            break;
                        }
                    }
                }

                Some(response) = response_rx.recv() => {
                    framed.send(serde_json::to_string(&response)?).await?;
                }
            }
        }

        info!(client_id, "Client handler exiting");
        Ok(())
    }
}

/// Best effort id of a request that failed to decode, 0 if there is none.
fn request_id_of(line: &str) -> u64 {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|value| value.get("id").and_then(Value::as_u64))
        .unwrap_or(0)
}
