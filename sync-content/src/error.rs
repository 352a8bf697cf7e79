//! Error types for sync-content.

use sync_types::{FileId, VersionId};
use thiserror::Error;

/// Errors that can occur during content operations.
#[derive(Error, Debug)]
pub enum ContentError {
    /// Content not found in store.
    #[error("content not found: {hash}")]
    NotFound {
        /// Hex-encoded hash of the missing content.
        hash: String,
    },

    /// No snapshot recorded for a version.
    #[error("no snapshot of version {version_id} of file {file_id}")]
    UnknownSnapshot {
        /// File concerned.
        file_id: FileId,
        /// Version asked for.
        version_id: VersionId,
    },

    /// Hash verification failed.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Expected hash (hex-encoded).
        expected: String,
        /// Actual hash (hex-encoded).
        actual: String,
    },

    /// Filesystem operation failed.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot index could not be read or written.
    #[error("snapshot index error: {0}")]
    Index(#[from] serde_json::Error),
}
