//! IPC client implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use sharemic_core::{FilterSpec, Properties};
use tokio::net::UnixStream;
use tokio::sync::{Mutex, oneshot};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, warn};

use crate::MAX_LINE_LENGTH;
use crate::error::{IpcError, IpcResult};
use crate::messages::{Method, Request, Response};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// Default time to wait for the daemon to answer a request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// IPC client for connecting to the sharemic daemon.
pub struct IpcClient {
    writer: Mutex<SplitSink<Framed<UnixStream, LinesCodec>, String>>,
    next_id: AtomicU64,
    pending: Pending,
    closed: Arc<AtomicBool>,
    timeout: Duration,
}

impl IpcClient {
    /// Connect to the daemon at the given socket path.
    ///
    /// # Errors
    /// Returns an error if the connection fails.
    pub async fn connect(socket_path: &Path) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (writer, mut reader) =
            Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)).split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let closed = Arc::new(AtomicBool::new(false));

        let pending_clone = Arc::clone(&pending);
        let closed_clone = Arc::clone(&closed);
        tokio::spawn(async move {
            while let Some(line) = reader.next().await {
                match line {
                    Ok(line) => match serde_json::from_str::<Response>(&line) {
                        Ok(response) => {
                            let mut pending = pending_clone.lock().await;
                            if let Some(tx) = pending.remove(&response.id) {
                                let _ = tx.send(response);
                            } else {
                                warn!(id = response.id, "Response for unknown request");
                            }
                        }
                        Err(e) => warn!(error = %e, "Unknown message format"),
                    },
                    Err(e) => {
                        error!(error = %e, "Read error");
                        break;
                    }
                }
            }

            debug!("Connection closed");
            // Waiters see the dropped senders as a closed connection
            let mut pending = pending_clone.lock().await;
            closed_clone.store(true, Ordering::SeqCst);
            pending.clear();
        });

        Ok(Self {
            writer: Mutex::new(writer),
            next_id: AtomicU64::new(1),
            pending,
            closed,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Connect to the daemon at the default socket path.
    ///
    /// # Errors
    /// Returns an error if the connection fails.
    pub async fn connect_default() -> IpcResult<Self> {
        Self::connect(&crate::socket_path()).await
    }

    /// Change how long [`IpcClient::request`] waits for an answer.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the daemon has closed the connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a request and wait for a response.
    ///
    /// # Errors
    /// Returns an error if the request cannot be written, the connection
    /// closes first or no answer arrives in time.
    pub async fn request(&self, method: Method) -> IpcResult<Response> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = Request { id, method };

        let (tx, rx) = oneshot::channel();
        {
            // Checked under the lock so the reader cannot clear in between
            let mut pending = self.pending.lock().await;
            if self.is_closed() {
                return Err(IpcError::ConnectionClosed);
            }
            pending.insert(id, tx);
        }

        let json = serde_json::to_string(&request)?;
        if let Err(e) = self.writer.lock().await.send(json).await {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(IpcError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(IpcError::Timeout)
            }
        }
    }

    /// Send a request and unwrap the daemon's result.
    ///
    /// # Errors
    /// Returns [`IpcError::ServerError`] when the daemon answered with an
    /// error, otherwise the errors of [`IpcClient::request`].
    pub async fn call(&self, method: Method) -> IpcResult<Value> {
        self.request(method)
            .await?
            .result
            .map_err(|e| IpcError::ServerError { code: e.code, message: e.message })
    }

    /// List nodes carrying all of `props`.
    ///
    /// # Errors
    /// See [`IpcClient::call`].
    pub async fn list_nodes(&self, props: Vec<String>) -> IpcResult<Vec<Properties>> {
        let value = self.call(Method::ListNodes { props }).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Start routing with `spec`.
    ///
    /// # Errors
    /// See [`IpcClient::call`].
    pub async fn link(&self, spec: &FilterSpec) -> IpcResult<()> {
        self.link_raw(serde_json::to_value(spec)?).await
    }

    /// Start routing with a spec document that has not been parsed locally.
    ///
    /// # Errors
    /// See [`IpcClient::call`].
    pub async fn link_raw(&self, spec: Value) -> IpcResult<()> {
        self.call(Method::Link { spec }).await.map(|_| ())
    }

    /// Stop routing.
    ///
    /// # Errors
    /// See [`IpcClient::call`].
    pub async fn unlink(&self) -> IpcResult<()> {
        self.call(Method::Unlink).await.map(|_| ())
    }

    /// Ask whether the active sound server is PipeWire.
    ///
    /// # Errors
    /// See [`IpcClient::call`].
    pub async fn has_pipewire(&self) -> IpcResult<bool> {
        self.call(Method::HasPipeWire).await?.as_bool().ok_or(IpcError::InvalidMessage)
    }

    /// Ask the daemon to exit.
    ///
    /// # Errors
    /// See [`IpcClient::call`].
    pub async fn shutdown(&self) -> IpcResult<()> {
        self.call(Method::Shutdown).await.map(|_| ())
    }
}
