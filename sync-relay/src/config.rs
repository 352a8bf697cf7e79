//! Configuration loading for sync-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`). Every
//! section may be omitted.

use serde::Deserialize;
use std::path::PathBuf;
use sync_core::{CoordinatorConfig, RetentionPolicy};
use sync_types::MAX_CHUNK_SIZE;

/// Root configuration for sync-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Lock lifetimes.
    #[serde(default)]
    pub locks: LocksConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Cleanup task configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for device connections (default: 0.0.0.0:7400).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Seconds a new connection has to send `device/register` (default: 10).
    /// Connections that stay silent are dropped.
    #[serde(default = "default_register_timeout_secs")]
    pub register_timeout_secs: u64,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Version window kept per file.
    #[serde(default)]
    pub retention: RetentionPolicy,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum connection attempts per peer IP per minute (default: 60).
    #[serde(default = "default_connections_per_minute")]
    pub connections_per_minute: u32,
    /// Maximum messages per device per minute (default: 6000).
    ///
    /// Chunk streams count, so this is sized for transfers, not chatter.
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Maximum messages per second across all devices (default: 2000).
    #[serde(default = "default_global_requests_per_second")]
    pub global_requests_per_second: u32,
    /// Maximum concurrent device sessions (default: 10000).
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
    /// Maximum device name length in characters (default: 256).
    #[serde(default = "default_max_device_name_len")]
    pub max_device_name_len: usize,
    /// Largest accepted chunk payload in bytes (default: 4 MiB).
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
}

/// Lock lifetimes.
#[derive(Debug, Clone, Deserialize)]
pub struct LocksConfig {
    /// Seconds before an auto-lock expires (default: 300).
    #[serde(default = "default_auto_lock_ttl_secs")]
    pub auto_lock_ttl_secs: Option<u64>,
    /// Seconds before a manual lock expires (default: never).
    #[serde(default)]
    pub lock_ttl_secs: Option<u64>,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bind address for HTTP server (default: 0.0.0.0:8080).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Cleanup task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Cleanup interval in seconds (default: 30).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable cleanup task (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:7400".to_string()
}

fn default_register_timeout_secs() -> u64 {
    10
}

fn default_database_path() -> PathBuf {
    PathBuf::from("relay.db")
}

fn default_connections_per_minute() -> u32 {
    60
}

fn default_messages_per_minute() -> u32 {
    6000
}

fn default_global_requests_per_second() -> u32 {
    2000
}

fn default_max_concurrent_sessions() -> usize {
    10_000
}

fn default_max_device_name_len() -> usize {
    256
}

fn default_max_chunk_size() -> usize {
    MAX_CHUNK_SIZE
}

fn default_auto_lock_ttl_secs() -> Option<u64> {
    Some(300)
}

fn default_http_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_cleanup_interval() -> u64 {
    30
}

fn default_cleanup_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            register_timeout_secs: default_register_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            retention: RetentionPolicy::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connections_per_minute: default_connections_per_minute(),
            messages_per_minute: default_messages_per_minute(),
            global_requests_per_second: default_global_requests_per_second(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            max_device_name_len: default_max_device_name_len(),
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            auto_lock_ttl_secs: default_auto_lock_ttl_secs(),
            lock_ttl_secs: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_http_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
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

    /// Settings for the coordinator.
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            retention: self.storage.retention.clone(),
            lock_ttl_secs: self.locks.lock_ttl_secs,
            auto_lock_ttl_secs: self.locks.auto_lock_ttl_secs,
        }
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
