//! Error types for the device engine.

use crate::registry::RegistryError;
use crate::transport::TransportError;
use sync_content::ContentError;
use sync_core::{ConflictError, HistoryError, SyncError, TransferError};
use sync_types::{FileId, VersionId, WireError};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message failed to encode or decode.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Snapshot store failure.
    #[error("content error: {0}")]
    Content(#[from] ContentError),

    /// Local registry failure.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Sync rule violated.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// History window rejected an operation.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// Conflict handling failed.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// Chunk transfer failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Local filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Not connected to relay.
    #[error("not connected")]
    NotConnected,

    /// File is not tracked on this device.
    #[error("unknown file {0}")]
    UnknownFile(FileId),

    /// Operation needs a file in conflict.
    #[error("file {0} is not in conflict")]
    NotInConflict(FileId),

    /// A version's content is not held locally.
    #[error("no local content for version {version} of file {file_id}")]
    MissingContent {
        /// File concerned
        file_id: FileId,
        /// Version without content
        version: VersionId,
    },

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Relay did not answer in time.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
