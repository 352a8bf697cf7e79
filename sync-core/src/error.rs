//! Error taxonomy shared by the sync engine and the relay authority.

use crate::conflict::ConflictError;
use crate::history::HistoryError;
use crate::transfer::TransferError;
use sync_types::{DeviceId, FileId, ModelError, VersionId};
use thiserror::Error;

/// Errors surfaced by sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another device holds the file lock
    #[error("file {file_id} is locked by {holder}")]
    LockDenied {
        /// Locked file
        file_id: FileId,
        /// Lock owner
        holder: DeviceId,
    },

    /// Received content does not match its declared hash
    #[error("integrity check failed for version {0}")]
    Integrity(VersionId),

    /// A version's parent is not the current head
    #[error("version {version} does not descend from head {head:?}")]
    DivergentHead {
        /// Version offered
        version: VersionId,
        /// Authoritative head
        head: Option<VersionId>,
    },

    /// A transfer made no progress within the stall timeout
    #[error("transfer of version {0} timed out")]
    TransferTimeout(VersionId),

    /// The connection to the relay failed
    #[error("channel error: {0}")]
    Channel(String),

    /// File is not known here
    #[error("unknown file {0}")]
    UnknownFile(FileId),

    /// Device is not a member of the file
    #[error("device {device} is not a member of file {file_id}")]
    NotAMember {
        /// File concerned
        file_id: FileId,
        /// Offending device
        device: DeviceId,
    },

    /// History window rejected an operation
    #[error(transparent)]
    History(#[from] HistoryError),

    /// Chunk transfer failed
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Conflict handling failed
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// Persisted record failed validation
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Result alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
