//! Error types for sync-relay.

use std::path::PathBuf;
use sync_types::{FileId, WireError};

/// Main error type for sync-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Persisted state could not be loaded into the coordinator.
    #[error("restore failed: {0}")]
    Restore(#[from] sync_core::SyncError),

    /// Rate limit exceeded.
    #[error("rate limit exceeded: {reason}")]
    RateLimited {
        /// Reason for rate limiting.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File record could not be encoded.
    #[error("failed to encode record for {file_id}: {source}")]
    Encode {
        /// File concerned.
        file_id: FileId,
        /// Underlying MessagePack error.
        source: rmp_serde::encode::Error,
    },

    /// Stored record could not be decoded.
    #[error("failed to decode stored record: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Stored key does not match the record it holds.
    #[error("corrupt row: {reason}")]
    Corrupt {
        /// What is wrong with the row.
        reason: String,
    },

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Protocol layer errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame could not be encoded, decoded or validated.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Peer announced a frame above the protocol limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Announced size.
        size: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// Unexpected message type.
    #[error("unexpected message type: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// Expected message type.
        expected: String,
        /// Actual message type received.
        actual: String,
    },

    /// Session not registered.
    #[error("session not registered: device/register required first")]
    NotRegistered,

    /// No registration arrived in time.
    #[error("no device/register within {0} seconds")]
    RegisterTimeout(u64),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
