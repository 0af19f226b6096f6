//! Detection of the active sound server.
//!
//! Applications talk to the sound server through the PulseAudio protocol;
//! PipeWire answers it with a server name like
//! `PulseAudio (on PipeWire 1.0.5)`.

use std::process::Command;
use std::sync::OnceLock;

use tracing::{debug, info, warn};

static HAS_PIPEWIRE: OnceLock<bool> = OnceLock::new();

/// Extract the `Server Name:` value from `pactl info` output.
#[must_use]
pub fn parse_server_name(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Server Name:"))
        .map(|name| name.trim().to_string())
}

fn is_pipewire(server_name: &str) -> bool {
    server_name.to_lowercase().contains("pipewire")
}

fn query_server_name() -> Option<String> {
    let output = match Command::new("pactl").arg("info").env("LC_ALL", "C").output() {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, "pactl not available");
            return None;
        }
    };

    if !output.status.success() {
        warn!(status = %output.status, "pactl info failed");
        return None;
    }

    parse_server_name(&String::from_utf8_lossy(&output.stdout))
}

/// Check if the active sound server is PipeWire.
///
/// The answer of the first successful query is kept for the lifetime of the
/// process. A failed query answers `false` and is retried next time.
#[must_use]
pub fn has_pipewire() -> bool {
    if let Some(cached) = HAS_PIPEWIRE.get() {
        return *cached;
    }

    let Some(name) = query_server_name() else {
        return false;
    };

    let result = is_pipewire(&name);
    info!(server = %name, pipewire = result, "Detected sound server");

    *HAS_PIPEWIRE.get_or_init(|| {
        debug!("Caching sound server probe");
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACTL_OUTPUT: &str = "\
Server String: /run/user/1000/pulse/native
Library Protocol Version: 35
Server Protocol Version: 35
Is Local: yes
Client Index: 86
Tile Size: 65472
User Name: user
Host Name: host
Server Name: PulseAudio (on PipeWire 1.0.5)
Server Version: 15.0.0
Default Sample Specification: float32le 2ch 48000Hz
";

    #[test]
    fn test_parse_server_name() {
        assert_eq!(parse_server_name(PACTL_OUTPUT).as_deref(), Some("PulseAudio (on PipeWire 1.0.5)"));
        assert!(parse_server_name("Server Version: 15.0.0").is_none());
        assert!(parse_server_name("").is_none());
    }

    #[test]
    fn test_is_pipewire() {
        assert!(is_pipewire("PulseAudio (on PipeWire 1.0.5)"));
        assert!(is_pipewire("PULSEAUDIO (ON PIPEWIRE)"));
        assert!(!is_pipewire("pulseaudio"));
        assert!(!is_pipewire(""));
    }
}
