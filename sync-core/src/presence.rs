//! Device presence and per-file membership.
//!
//! Tracks which devices are connected and which of them are members of each
//! file. A disconnect removes every membership the device had, remembers it
//! as stale, and releases any lock it held so exclusivity never outlives a
//! connection.

use crate::lock::LockCoordinator;
use std::collections::{BTreeSet, HashMap};
use sync_types::{DeviceId, FileId, LockRecord};

/// A connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePresence {
    /// Device name given at registration.
    pub name: Option<String>,
    /// When the current session started (Unix seconds).
    pub connected_at: u64,
    /// Last message seen (Unix seconds).
    pub last_seen: u64,
}

/// Effects of a disconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Departure {
    /// Files the device was a member of.
    pub files: Vec<FileId>,
    /// Locks released on its behalf.
    pub released_locks: Vec<LockRecord>,
}

/// Connected devices and file memberships.
#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    devices: HashMap<DeviceId, DevicePresence>,
    members: HashMap<FileId, BTreeSet<DeviceId>>,
    stale: HashMap<FileId, BTreeSet<DeviceId>>,
}

impl PresenceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh a device session. Returns `true` for a new session.
    pub fn register(&mut self, device_id: DeviceId, name: Option<String>, now: u64) -> bool {
        match self.devices.get_mut(&device_id) {
            Some(presence) => {
                if name.is_some() {
                    presence.name = name;
                }
                presence.last_seen = now;
                false
            }
            None => {
                self.devices.insert(
                    device_id,
                    DevicePresence {
                        name,
                        connected_at: now,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    /// Record activity from a device.
    pub fn touch(&mut self, device_id: DeviceId, now: u64) {
        if let Some(presence) = self.devices.get_mut(&device_id) {
            presence.last_seen = now;
        }
    }

    /// Whether a device has a live session.
    pub fn is_connected(&self, device_id: DeviceId) -> bool {
        self.devices.contains_key(&device_id)
    }

    /// Presence details of a connected device.
    pub fn device(&self, device_id: DeviceId) -> Option<&DevicePresence> {
        self.devices.get(&device_id)
    }

    /// Number of connected devices.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Add a device to a file's members and return the current members.
    pub fn join(&mut self, file_id: FileId, device_id: DeviceId) -> Vec<DeviceId> {
        if let Some(stale) = self.stale.get_mut(&file_id) {
            stale.remove(&device_id);
        }
        let members = self.members.entry(file_id).or_default();
        members.insert(device_id);
        members.iter().copied().collect()
    }

    /// Remove a device from one file.
    pub fn leave(&mut self, file_id: FileId, device_id: DeviceId) -> bool {
        self.members
            .get_mut(&file_id)
            .is_some_and(|members| members.remove(&device_id))
    }

    /// Current members of a file, sorted.
    pub fn members(&self, file_id: FileId) -> Vec<DeviceId> {
        self.members
            .get(&file_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Members of a file other than `exclude`.
    pub fn peers(&self, file_id: FileId, exclude: DeviceId) -> Vec<DeviceId> {
        self.members
            .get(&file_id)
            .map(|m| m.iter().copied().filter(|d| *d != exclude).collect())
            .unwrap_or_default()
    }

    /// Whether a device is a member of a file.
    pub fn is_member(&self, file_id: FileId, device_id: DeviceId) -> bool {
        self.members
            .get(&file_id)
            .is_some_and(|m| m.contains(&device_id))
    }

    /// Former members that were lost through disconnect.
    pub fn stale_members(&self, file_id: FileId) -> Vec<DeviceId> {
        self.stale
            .get(&file_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Files a device is a member of.
    pub fn files_of(&self, device_id: DeviceId) -> Vec<FileId> {
        self.members
            .iter()
            .filter(|(_, m)| m.contains(&device_id))
            .map(|(file_id, _)| *file_id)
            .collect()
    }

    /// Drop a device's session, memberships and locks.
    pub fn disconnect(&mut self, device_id: DeviceId, locks: &mut LockCoordinator) -> Departure {
        self.devices.remove(&device_id);
        let files = self.files_of(device_id);
        for file_id in &files {
            if let Some(members) = self.members.get_mut(file_id) {
                members.remove(&device_id);
            }
            self.stale.entry(*file_id).or_default().insert(device_id);
        }
        Departure {
            files,
            released_locks: locks.release_all_for_device(device_id),
        }
    }
}
