//! Signal handling for graceful shutdown.

use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

/// Resolve once SIGTERM or SIGINT arrives, naming the signal.
///
/// # Errors
/// Returns an error if the handlers cannot be installed.
pub async fn shutdown_signal() -> Result<&'static str> {
    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    let name = tokio::select! {
        _ = terminate.recv() => "SIGTERM",
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to install SIGINT handler")?;
            "SIGINT"
        }
    };

    info!(signal = name, "Received shutdown signal");
    Ok(name)
}
