//! Error types for wire and model handling.

use crate::ids::{DeviceId, LockId, VersionId};
use thiserror::Error;

/// Errors raised while encoding, decoding or validating messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Frame exceeds the protocol limit
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Actual size
        size: usize,
        /// Allowed maximum
        max: usize,
    },

    /// Message is well-formed but violates a protocol rule
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Violations of [`FileRecord`](crate::FileRecord) invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// Head points outside the history window
    #[error("head version {0} is not in the history window")]
    MissingHead(VersionId),

    /// Versions exist but none is designated head
    #[error("file has versions but no head")]
    NoHead,

    /// Same version id appears twice
    #[error("duplicate version {0}")]
    DuplicateVersion(VersionId),

    /// Version recorded under the wrong file
    #[error("version {0} belongs to another file")]
    ForeignVersion(VersionId),

    /// Lock recorded under the wrong file
    #[error("lock {0} belongs to another file")]
    ForeignLock(LockId),

    /// More than one state for a device
    #[error("duplicate state for device {0}")]
    DuplicateDeviceState(DeviceId),
}
