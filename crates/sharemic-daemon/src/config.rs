//! Daemon configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sharemic_pipewire::EngineConfig;
use tracing::info;

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Engine settings
    #[serde(default)]
    pub engine: EngineSettings,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Socket path (optional, uses the runtime dir if not set)
    pub socket_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { log_level: default_log_level(), socket_path: None }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Routing engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// How long to wait for the engine thread to connect
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// Name of the virtual microphone node
    #[serde(default = "default_sink_name")]
    pub sink_name: String,
    /// How long to wait for the virtual microphone's ports
    #[serde(default = "default_sink_timeout_ms")]
    pub sink_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            ready_timeout_ms: default_ready_timeout_ms(),
            sink_name: default_sink_name(),
            sink_timeout_ms: default_sink_timeout_ms(),
        }
    }
}

fn default_ready_timeout_ms() -> u64 {
    1000
}

fn default_sink_name() -> String {
    EngineConfig::default().sink_name
}

fn default_sink_timeout_ms() -> u64 {
    5000
}

impl From<&EngineSettings> for EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            ready_timeout: Duration::from_millis(settings.ready_timeout_ms),
            sink_name: settings.sink_name.clone(),
            sink_timeout: Duration::from_millis(settings.sink_timeout_ms),
        }
    }
}

impl Config {
    /// Socket to serve on.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.daemon.socket_path.clone().unwrap_or_else(sharemic_ipc::socket_path)
    }
}

/// Load configuration from file or defaults.
pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

fn load_config_from(config_path: &Path) -> Result<Config> {
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {config_path:?}"))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {config_path:?}"))?;
        Ok(config)
    } else {
        info!(?config_path, "Config file not found, using defaults");
        Ok(Config::default())
    }
}

/// Get the configuration file path.
fn config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "sharemic", "sharemic")
        .context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}
