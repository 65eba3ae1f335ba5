use std::path::PathBuf;

use hangar_paths::HangarPaths;
use serde::Deserialize;
use tracing::warn;

use crate::errors::DaemonError;

fn default_port() -> u16 {
    7341
}
fn default_flush_threshold() -> usize {
    16 * 1024
}
fn default_flush_interval_ms() -> u64 {
    250
}
fn default_file_max_size() -> u64 {
    10 * 1024 * 1024
}
fn default_idle_timeout_ms() -> u64 {
    10_000
}
fn default_active_window_ms() -> u64 {
    1_000
}
fn default_queue_concurrency() -> usize {
    4
}
fn default_subscriber_queue_size() -> usize {
    256
}
fn default_history_timeout_ms() -> u64 {
    3_000
}
fn default_kill_grace_ms() -> u64 {
    3_000
}
fn default_outbound_timeout_ms() -> u64 {
    15_000
}
fn default_max_message_files() -> usize {
    10
}
fn default_max_total_file_size() -> u64 {
    50 * 1024 * 1024
}

/// Daemon configuration, loaded from `<config_root>/config.toml` with every
/// field defaulted. `HANGAR_HOME` and `HANGAR_PORT` env vars override.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(skip)]
    pub home: PathBuf,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Output-log buffer size that forces an immediate flush.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// Output-log timed-flush interval.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Output-log file cap; exceeding it truncates from the front.
    #[serde(default = "default_file_max_size")]
    pub file_max_size: u64,

    /// Silence before an agent worker is classified idle.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Window within which fresh output classifies a worker active.
    #[serde(default = "default_active_window_ms")]
    pub active_window_ms: u64,

    #[serde(default = "default_queue_concurrency")]
    pub queue_concurrency: usize,

    /// Bounded per-subscriber event queue; overflow drops the subscriber.
    #[serde(default = "default_subscriber_queue_size")]
    pub subscriber_queue_size: usize,

    /// Worker WS history handshake cap.
    #[serde(default = "default_history_timeout_ms")]
    pub history_timeout_ms: u64,

    /// SIGTERM → SIGKILL escalation grace.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Timeout for outbound HTTP to user-configured URLs.
    #[serde(default = "default_outbound_timeout_ms")]
    pub outbound_timeout_ms: u64,

    #[serde(default = "default_max_message_files")]
    pub max_message_files: usize,

    #[serde(default = "default_max_total_file_size")]
    pub max_total_file_size: u64,

    /// Shared secret for inbound GitHub webhook signatures.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// External metadata-suggester endpoint for branch naming.
    #[serde(default)]
    pub suggester_url: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::new(),
            port: default_port(),
            flush_threshold: default_flush_threshold(),
            flush_interval_ms: default_flush_interval_ms(),
            file_max_size: default_file_max_size(),
            idle_timeout_ms: default_idle_timeout_ms(),
            active_window_ms: default_active_window_ms(),
            queue_concurrency: default_queue_concurrency(),
            subscriber_queue_size: default_subscriber_queue_size(),
            history_timeout_ms: default_history_timeout_ms(),
            kill_grace_ms: default_kill_grace_ms(),
            outbound_timeout_ms: default_outbound_timeout_ms(),
            max_message_files: default_max_message_files(),
            max_total_file_size: default_max_total_file_size(),
            webhook_secret: None,
            suggester_url: None,
        }
    }
}

impl DaemonConfig {
    /// Load config for the given root. A missing config file yields
    /// defaults; a malformed one is a startup error.
    pub fn load(paths: &HangarPaths) -> Result<Self, DaemonError> {
        let mut config = match std::fs::read_to_string(paths.user_config()) {
            Ok(text) => toml::from_str::<DaemonConfig>(&text)
                .map_err(|e| DaemonError::validation(format!("config.toml: {}", e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DaemonConfig::default(),
            Err(e) => return Err(e.into()),
        };
        config.home = paths.hangar_dir().to_path_buf();

        if let Ok(port) = std::env::var("HANGAR_PORT") {
            match port.parse() {
                Ok(port) => config.port = port,
                Err(_) => warn!(event = "daemon.config.bad_port_env", value = %port),
            }
        }
        if let Ok(secret) = std::env::var("HANGAR_WEBHOOK_SECRET") {
            config.webhook_secret = Some(secret);
        }
        if let Ok(url) = std::env::var("HANGAR_SUGGESTER_URL") {
            config.suggester_url = Some(url);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.flush_threshold, 16 * 1024);
        assert_eq!(config.flush_interval_ms, 250);
        assert_eq!(config.file_max_size, 10 * 1024 * 1024);
        assert_eq!(config.idle_timeout_ms, 10_000);
        assert_eq!(config.queue_concurrency, 4);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HangarPaths::from_dir(dir.path().to_path_buf());
        let config = DaemonConfig::load(&paths).unwrap();
        assert_eq!(config.home, dir.path());
        assert_eq!(config.port, default_port());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "port = 9999\nidle_timeout_ms = 500\n")
            .unwrap();
        let paths = HangarPaths::from_dir(dir.path().to_path_buf());
        let config = DaemonConfig::load(&paths).unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.idle_timeout_ms, 500);
        assert_eq!(config.flush_interval_ms, 250);
    }

    #[test]
    fn test_load_malformed_file_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "port = \"not a number").unwrap();
        let paths = HangarPaths::from_dir(dir.path().to_path_buf());
        let err = DaemonConfig::load(&paths).unwrap_err();
        assert_eq!(err.kind(), hangar_core::ErrorKind::Validation);
    }
}
