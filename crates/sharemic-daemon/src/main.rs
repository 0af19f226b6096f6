//! sharemic Daemon - session service owning the PipeWire routing engine.
//!
//! The daemon keeps one routing engine alive for the session and serves
//! `list`, `link` and `unlink` requests for it over a Unix socket.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use directories::BaseDirs;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

mod config;
mod server;
mod signals;

use server::{HandleResult, Router};
use sharemic_ipc::{IpcServer, Response};
use sharemic_pipewire::{EngineConfig, Patchbay};

const LOG_FILE: &str = "sharemic.log";

/// Directory for the log file: `SHAREMIC_LOG_DIR`, else the XDG state dir.
fn log_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("SHAREMIC_LOG_DIR") {
        return PathBuf::from(dir);
    }

    BaseDirs::new()
        .and_then(|dirs| dirs.state_dir().map(|dir| dir.join("sharemic")))
        .unwrap_or_else(|| std::env::temp_dir().join("sharemic"))
}

fn env_filter(level: &str) -> Result<EnvFilter> {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return Ok(EnvFilter::from_default_env());
    }

    let level: LevelFilter = level.parse().with_context(|| format!("Invalid log level: {level}"))?;

    Ok(EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy("")
        .add_directive(format!("sharemic={level}").parse()?)
        .add_directive("sharemic_daemon=debug".parse()?)
        .add_directive("sharemic_pipewire=debug".parse()?))
}

/// Install the subscriber. The returned guard flushes the log file on drop.
fn init_logging(level: &str) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = if std::env::var_os("SHAREMIC_ENABLE_LOG").is_some() {
        let dir = log_dir();
        match RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(LOG_FILE)
            .build(&dir)
        {
            Ok(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
            }
            Err(e) => {
                eprintln!("Warning: Failed to open log file in {}: {e}", dir.display());
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter(level)?)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config()?;
    let _log_guard = init_logging(&config.daemon.log_level)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting sharemic daemon");

    // The facade blocks while the engine thread connects
    let engine_config = EngineConfig::from(&config.engine);
    let patchbay = tokio::task::spawn_blocking(move || Patchbay::new(engine_config))
        .await
        .context("Engine startup task failed")?
        .context("Failed to start the routing engine")?;
    let router: Arc<dyn Router> = Arc::new(patchbay);
    info!("Routing engine ready");

    let socket = config.socket_path();
    info!(?socket, "Starting IPC server");
    let (ipc_server, mut request_rx) =
        IpcServer::bind(&socket).await.context("Failed to start IPC server")?;

    let ipc_handle = tokio::spawn(async move {
        ipc_server.run().await;
    });

    let shutdown = signals::shutdown_signal();
    tokio::pin!(shutdown);

    // Handlers report a shutdown request here once it has been answered
    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::channel::<()>(1);

    info!("Daemon running. Press Ctrl+C to exit.");

    loop {
        tokio::select! {
            Some((client_id, request, response_tx)) = request_rx.recv() => {
                debug!(client_id, request_id = request.id, method = request.method.name(), "Handling IPC request");

                let router = Arc::clone(&router);
                let stop_tx = stop_tx.clone();
                tokio::spawn(async move {
                    let id = request.id;
                    let handled = tokio::task::spawn_blocking(move || {
                        server::handle_request(&request.method, router.as_ref())
                    })
                    .await;

                    match handled {
                        Ok(HandleResult { response, shutdown }) => {
                            let _ = response_tx.send(Response { id, result: response }).await;
                            if shutdown {
                                let _ = stop_tx.try_send(());
                            }
                        }
                        Err(e) => error!(client_id, request_id = id, error = %e, "Request handler panicked"),
                    }
                });
            }

            Some(()) = stop_rx.recv() => {
                info!("Shutdown requested over IPC");
                break;
            }

            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!(error = %e, "Signal handling unavailable, stopping");
                }
                break;
            }
        }
    }

    info!("Shutting down...");
    ipc_handle.abort();

    // Dropping the last handle unlinks and joins the engine thread
    tokio::task::spawn_blocking(move || drop(router))
        .await
        .context("Engine shutdown task failed")?;

    if let Err(e) = tokio::fs::remove_file(&socket).await {
        debug!(error = %e, "Could not remove socket file");
    }

    info!("sharemic daemon stopped");
    Ok(())
}
