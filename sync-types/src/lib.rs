//! # sync-types
//!
//! Wire format and data model types for Atrius Sync.
//!
//! This crate provides the foundational types used across all Atrius crates:
//! - [`FileId`], [`DeviceId`], [`VersionId`], [`LockId`], [`SessionId`] - Identity types
//! - [`ContentHash`] - BLAKE3 content and chunk hashes
//! - [`VersionRecord`], [`FileRecord`], [`LockRecord`], [`DeviceFileState`] - Shared model
//! - [`Message`] - Protocol messages (`device/register`, `file/chunk`, ...)
//! - [`WireError`], [`ModelError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod hash;
mod ids;
mod messages;
mod model;

pub use error::{ModelError, WireError};
pub use hash::{ContentHash, ContentHasher};
pub use ids::{DeviceId, FileId, LockId, SessionId, VersionId};
pub use messages::{
    Bye, ChunkRequest, DeviceRegister, DeviceRegistered, FileAck, FileChunk, FileComplete,
    FileError, FileRegister, FileRegistered, FileStateReport, LockAcquire, LockDenied,
    LockRelease, LockState, Message, PresenceUpdate, MAX_CHUNK_SIZE, MAX_MESSAGE_SIZE,
    MAX_NAME_LEN,
};
pub use model::{
    unix_timestamp, DeviceFileState, FileRecord, FileSyncState, Hydration, LockMode,
    LockRecord, TransferDirection, VersionRecord,
};
