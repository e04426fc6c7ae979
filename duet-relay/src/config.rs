//! Configuration loading for duet-relay.
//!
//! Configuration is loaded from a TOML file (default: `duet.toml`).

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for duet-relay.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Request limit configuration.
    pub limits: LimitsConfig,
    /// Cleanup task configuration.
    pub cleanup: CleanupConfig,
    /// Push delivery configuration.
    pub push: PushConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener (default: 0.0.0.0:8080).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Maximum request body size in bytes (default: 2MB).
    ///
    /// Entry payloads are base64 in transit, so this bounds the decoded
    /// ciphertext at roughly three quarters of the value.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

/// Request limit configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Per-key request cap within the throttle window (default: 60).
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    /// Throttle window length in seconds (default: 60).
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Timeout in seconds for the first auth frame on a handoff channel
    /// (default: 10). Channels that don't authenticate in time are dropped.
    #[serde(default = "default_channel_auth_timeout_secs")]
    pub channel_auth_timeout_secs: u64,
}

/// Cleanup task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Storage cleanup interval in seconds (default: 3600 = 1 hour).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Pending-bundle sweep interval in seconds (default: 120).
    #[serde(default = "default_bundle_sweep_interval")]
    pub bundle_sweep_secs: u64,
    /// Enable cleanup tasks (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

/// Push delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// Enable push delivery (default: true). When disabled, notify
    /// events are dropped; entries are still stored.
    #[serde(default = "default_push_enabled")]
    pub enabled: bool,
    /// Request timeout in seconds for the push transport (default: 10).
    #[serde(default = "default_push_timeout_secs")]
    pub request_timeout_secs: u64,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("duet.db")
}

fn default_max_body_size() -> usize {
    2 * 1024 * 1024 // 2MB
}

fn default_requests_per_window() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

fn default_channel_auth_timeout_secs() -> u64 {
    10
}

fn default_cleanup_interval() -> u64 {
    3600 // 1 hour
}

fn default_bundle_sweep_interval() -> u64 {
    120
}

fn default_cleanup_enabled() -> bool {
    true
}

fn default_push_enabled() -> bool {
    true
}

fn default_push_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: default_bind_address(),
            },
            storage: StorageConfig {
                database: default_database_path(),
                max_body_size: default_max_body_size(),
            },
            limits: LimitsConfig {
                requests_per_window: default_requests_per_window(),
                window_secs: default_window_secs(),
                channel_auth_timeout_secs: default_channel_auth_timeout_secs(),
            },
            cleanup: CleanupConfig {
                interval_secs: default_cleanup_interval(),
                bundle_sweep_secs: default_bundle_sweep_interval(),
                enabled: default_cleanup_enabled(),
            },
            push: PushConfig {
                enabled: default_push_enabled(),
                request_timeout_secs: default_push_timeout_secs(),
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.limits.requests_per_window, 60);
        assert_eq!(config.limits.window_secs, 60);
        assert_eq!(config.cleanup.bundle_sweep_secs, 120);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:5000"

[storage]
database = "/data/duet.db"
max_body_size = 1048576

[limits]
requests_per_window = 10

[cleanup]
interval_secs = 1800

[push]
enabled = false
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:5000");
        assert_eq!(config.storage.database, PathBuf::from("/data/duet.db"));
        assert_eq!(config.storage.max_body_size, 1048576);
        assert_eq!(config.limits.requests_per_window, 10);
        assert_eq!(config.cleanup.interval_secs, 1800);
        assert!(!config.push.enabled);
    }

    #[test]
    fn config_missing_fields_use_defaults() {
        let toml = r#"
[server]
[storage]
[limits]
[cleanup]
[push]
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.max_body_size, 2 * 1024 * 1024);
        assert_eq!(config.limits.channel_auth_timeout_secs, 10);
        assert!(config.push.enabled);
    }

    #[test]
    fn channel_auth_timeout_configurable_from_toml() {
        let toml = r#"
[server]
[storage]
[limits]
channel_auth_timeout_secs = 30
[cleanup]
[push]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.limits.channel_auth_timeout_secs, 30);
    }
}
