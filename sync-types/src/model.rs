//! Shared data model: versions, files, locks and per-device state.
//!
//! A [`FileRecord`] and its nested records are the shared source of truth for
//! one file. Each device holds a replica; the relay holds the authoritative
//! one.

use crate::error::ModelError;
use crate::hash::ContentHash;
use crate::ids::{DeviceId, FileId, LockId, VersionId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One immutable version of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Unique id of this version.
    pub version_id: VersionId,
    /// File this version belongs to.
    pub file_id: FileId,
    /// Parent version; `None` only for the first version of a file.
    pub parent_version_id: Option<VersionId>,
    /// Device that produced this version.
    pub origin_device_id: DeviceId,
    /// Creation time (Unix seconds, informational only).
    pub timestamp: u64,
    /// Hash of the whole content.
    pub content_hash: ContentHash,
    /// Content size in bytes.
    pub size_bytes: u64,
    /// Chunk size the content was split with.
    pub chunk_size: u32,
    /// Ordered per-chunk hashes.
    pub chunk_hashes: Vec<ContentHash>,
}

impl VersionRecord {
    /// Number of chunks the content is split into.
    pub fn total_chunks(&self) -> u32 {
        self.chunk_hashes.len() as u32
    }

    /// A new record carrying the same content under a different parent.
    ///
    /// Used when content must be re-published on top of another version
    /// (conflict resolution, rollback).
    pub fn reparented(
        &self,
        parent_version_id: Option<VersionId>,
        origin_device_id: DeviceId,
        timestamp: u64,
    ) -> Self {
        Self {
            version_id: VersionId::new(),
            file_id: self.file_id,
            parent_version_id,
            origin_device_id,
            timestamp,
            content_hash: self.content_hash,
            size_bytes: self.size_bytes,
            chunk_size: self.chunk_size,
            chunk_hashes: self.chunk_hashes.clone(),
        }
    }
}

/// How a lock request treats an existing live lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Fail if another device holds the lock.
    Exclusive,
    /// Replace any existing lock.
    Override,
}

/// A granted single-writer lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Unique id of this grant.
    pub lock_id: LockId,
    /// Locked file.
    pub file_id: FileId,
    /// Device holding the lock.
    pub owner_device_id: DeviceId,
    /// User on whose behalf the device holds it.
    pub owner_user_id: String,
    /// Grant time (Unix seconds).
    pub acquired_at: u64,
    /// Acquired around a single push rather than manually.
    pub auto_lock: bool,
    /// Automatic release time, if any.
    pub expires_at: Option<u64>,
}

impl LockRecord {
    /// Whether the lock has expired at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(at) if now > at)
    }
}

/// Sync state of one file on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSyncState {
    /// No local content and no known remote version.
    Absent,
    /// A remote head exists that is not present locally.
    AvailableRemote,
    /// Receiving a remote version.
    Pulling,
    /// Local content matches the head.
    Ready,
    /// Sending a local version.
    Pushing,
    /// Waiting for another device's lock.
    LockBlocked,
    /// Divergent heads awaiting a human decision.
    Conflict,
    /// Last operation failed; retryable.
    Error,
}

/// Per-(device, file) state, never deleted once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFileState {
    /// Device this state describes.
    pub device_id: DeviceId,
    /// Current sync state.
    pub state: FileSyncState,
    /// Head the device is known to hold.
    pub known_head_version_id: Option<VersionId>,
    /// Last contact (Unix seconds).
    pub last_seen_at: u64,
    /// Most recent error, if any.
    pub last_error: Option<String>,
    /// Membership lost through disconnect.
    pub stale: bool,
}

impl DeviceFileState {
    /// First contact with a device.
    pub fn new(device_id: DeviceId, now: u64) -> Self {
        Self {
            device_id,
            state: FileSyncState::Absent,
            known_head_version_id: None,
            last_seen_at: now,
            last_error: None,
            stale: false,
        }
    }
}

/// The shared record of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path-independent identity.
    pub file_id: FileId,
    /// Device that first added the file.
    pub origin_device_id: DeviceId,
    /// Creation time (Unix seconds).
    pub created_at: u64,
    /// Current head; `None` until the first version is accepted.
    pub head_version_id: Option<VersionId>,
    /// Bounded history window, oldest first.
    pub versions: Vec<VersionRecord>,
    /// Live lock, if any.
    pub lock: Option<LockRecord>,
    /// One entry per known device.
    pub device_states: Vec<DeviceFileState>,
}

impl FileRecord {
    /// The head record.
    pub fn head(&self) -> Option<&VersionRecord> {
        let head = self.head_version_id?;
        self.versions.iter().find(|v| v.version_id == head)
    }

    /// Check the record's structural invariants.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut seen = HashSet::new();
        for version in &self.versions {
            if version.file_id != self.file_id {
                return Err(ModelError::ForeignVersion(version.version_id));
            }
            if !seen.insert(version.version_id) {
                return Err(ModelError::DuplicateVersion(version.version_id));
            }
        }

        match self.head_version_id {
            Some(head) if !seen.contains(&head) => return Err(ModelError::MissingHead(head)),
            None if !self.versions.is_empty() => return Err(ModelError::NoHead),
            _ => {}
        }

        if let Some(lock) = &self.lock {
            if lock.file_id != self.file_id {
                return Err(ModelError::ForeignLock(lock.lock_id));
            }
        }

        let mut devices = HashSet::new();
        for state in &self.device_states {
            if !devices.insert(state.device_id) {
                return Err(ModelError::DuplicateDeviceState(state.device_id));
            }
        }
        Ok(())
    }
}

/// Whether local disk content for a file is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Hydration {
    /// Content matches the local head.
    FullyPresent,
    /// A transfer is partially applied to the staging area.
    Partial,
    /// Nothing on disk.
    #[default]
    Absent,
}

/// Direction of a transfer session relative to the local device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    /// Sending a local version.
    Push,
    /// Receiving a remote version.
    Pull,
}
