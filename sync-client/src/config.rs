//! Configuration for a sync device.
//!
//! Loaded from a TOML file (default: `atrius.toml`). Every field has a
//! default, so an empty file is a valid configuration.

use crate::registry::AutoLockPreference;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_core::{RetentionPolicy, RetryPolicy, SyncPolicy, DEFAULT_CHUNK_SIZE};
use sync_types::MAX_CHUNK_SIZE;

/// Root configuration for a device.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Device identity and local storage.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Relay connection.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Sync behaviour.
    #[serde(default)]
    pub sync: SyncSettings,
    /// Transfer retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Local history window.
    #[serde(default)]
    pub retention: RetentionPolicy,
}

/// Device identity and local storage.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Human-readable device name (default: "atrius device").
    #[serde(default = "default_device_name")]
    pub name: String,
    /// User on whose behalf locks are taken (default: "local").
    #[serde(default = "default_user_id")]
    pub user_id: String,
    /// Directory for the registry and snapshot store (default: `.atrius`).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Relay connection.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Relay address as `host:port` (default: 127.0.0.1:7400).
    #[serde(default = "default_relay_address")]
    pub address: String,
    /// Timeout for establishing the connection (default: 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Timeout for request/response exchanges such as registration (default: 10).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Sync behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Chunk size for new versions in bytes (default: 256 KiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    /// Seconds without progress before a transfer counts as stalled (default: 30).
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    /// Take an auto-lock before pushing (default: true).
    #[serde(default = "default_true")]
    pub require_lock: bool,
    /// Pull accepted remote versions without asking (default: true).
    #[serde(default = "default_true")]
    pub auto_pull: bool,
}

// Default value functions
fn default_device_name() -> String {
    "atrius device".to_string()
}

fn default_user_id() -> String {
    "local".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".atrius")
}

fn default_relay_address() -> String {
    "127.0.0.1:7400".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_chunk_size() -> u32 {
    DEFAULT_CHUNK_SIZE
}

fn default_stall_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            user_id: default_user_id(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            address: default_relay_address(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            stall_timeout_secs: default_stall_timeout_secs(),
            require_lock: true,
            auto_pull: true,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            relay: RelayConfig::default(),
            sync: SyncSettings::default(),
            retry: RetryPolicy::default(),
            retention: RetentionPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Set the device name.
    pub fn with_device_name(mut self, name: &str) -> Self {
        self.device.name = name.to_string();
        self
    }

    /// Set the relay address.
    pub fn with_relay_address(mut self, address: &str) -> Self {
        self.relay.address = address.to_string();
        self
    }

    /// Set the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.device.data_dir = dir.into();
        self
    }

    /// Set the chunk size for new versions.
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.sync.chunk_size = chunk_size.max(1);
        self
    }

    /// Chunk size for new versions, within what the relay accepts.
    pub fn chunk_size(&self) -> u32 {
        self.sync.chunk_size.clamp(1, MAX_CHUNK_SIZE as u32)
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Turn automatic pulling on or off.
    pub fn with_auto_pull(mut self, auto_pull: bool) -> Self {
        self.sync.auto_pull = auto_pull;
        self
    }

    /// State machine policy for a file with the given lock preference.
    pub fn policy(&self, preference: AutoLockPreference) -> SyncPolicy {
        SyncPolicy {
            require_lock: self.sync.require_lock && preference == AutoLockPreference::OnEdit,
            auto_pull: self.sync.auto_pull,
            retry: self.retry.clone(),
        }
    }

    /// Where the local registry is stored.
    pub fn registry_path(&self) -> PathBuf {
        self.device.data_dir.join("registry.json")
    }

    /// Root of the snapshot blob store.
    pub fn blob_dir(&self) -> PathBuf {
        self.device.data_dir.join("blobs")
    }

    /// Where the snapshot index is stored.
    pub fn snapshot_index_path(&self) -> PathBuf {
        self.device.data_dir.join("snapshots.json")
    }

    /// Connection timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.connect_timeout_secs)
    }

    /// Request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.request_timeout_secs)
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
