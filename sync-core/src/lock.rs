//! Single-writer lock table.
//!
//! The authority (normally the relay) owns one [`LockCoordinator`] and funnels
//! every acquire and release through it, so concurrent requests for the same
//! file resolve to exactly one winner. Expired locks are released lazily the
//! first time any operation observes them; those releases queue up until the
//! authority collects them with [`LockCoordinator::take_lapsed`] and announces
//! them.

use std::collections::HashMap;
use sync_types::{DeviceId, FileId, LockId, LockMode, LockRecord};

/// A request for a file lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    /// File to lock.
    pub file_id: FileId,
    /// Requesting device.
    pub device_id: DeviceId,
    /// User on whose behalf the device asks.
    pub user_id: String,
    /// Exclusive or override.
    pub mode: LockMode,
    /// Auto-lock around a single push.
    pub auto_lock: bool,
    /// Lifetime in seconds; `None` never expires.
    pub ttl_secs: Option<u64>,
}

/// A successful acquire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGrant {
    /// The live lock.
    pub lock: LockRecord,
    /// A foreign lock replaced by an override.
    pub superseded: Option<LockRecord>,
    /// The caller already held the lock.
    pub renewed: bool,
}

/// An acquire refused because another device holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockDenial {
    /// Current owner.
    pub holder: DeviceId,
    /// When the owner acquired it.
    pub acquired_at: u64,
}

/// Lock table keyed by file.
#[derive(Debug, Clone, Default)]
pub struct LockCoordinator {
    locks: HashMap<FileId, LockRecord>,
    lapsed: Vec<LockRecord>,
}

impl LockCoordinator {
    /// Empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock for a file.
    ///
    /// The owner re-acquiring is idempotent: the existing grant is kept and
    /// its expiry refreshed. A manual lock is never downgraded to an
    /// auto-lock by a re-acquire.
    pub fn acquire(&mut self, request: LockRequest, now: u64) -> Result<LockGrant, LockDenial> {
        self.expire_file(request.file_id, now);
        let expires_at = request.ttl_secs.map(|ttl| now.saturating_add(ttl));

        if let Some(existing) = self.locks.get_mut(&request.file_id) {
            if existing.owner_device_id == request.device_id {
                // An auto request against a manual lock leaves it untouched.
                if !(request.auto_lock && !existing.auto_lock) {
                    existing.auto_lock = request.auto_lock;
                    existing.expires_at = expires_at;
                }
                return Ok(LockGrant {
                    lock: existing.clone(),
                    superseded: None,
                    renewed: true,
                });
            }
            if request.mode != LockMode::Override {
                return Err(LockDenial {
                    holder: existing.owner_device_id,
                    acquired_at: existing.acquired_at,
                });
            }
        }

        let lock = LockRecord {
            lock_id: LockId::new(),
            file_id: request.file_id,
            owner_device_id: request.device_id,
            owner_user_id: request.user_id,
            acquired_at: now,
            auto_lock: request.auto_lock,
            expires_at,
        };
        let superseded = self.locks.insert(request.file_id, lock.clone());
        Ok(LockGrant {
            lock,
            superseded,
            renewed: false,
        })
    }

    /// Release a lock. A no-op unless `device_id` is the owner.
    ///
    /// Returns the released lock.
    pub fn release(&mut self, file_id: FileId, device_id: DeviceId, now: u64) -> Option<LockRecord> {
        self.expire_file(file_id, now);
        match self.locks.get(&file_id) {
            Some(lock) if lock.owner_device_id == device_id => self.locks.remove(&file_id),
            _ => None,
        }
    }

    /// Release a lock regardless of owner.
    pub fn force_release(&mut self, file_id: FileId) -> Option<LockRecord> {
        self.locks.remove(&file_id)
    }

    /// Release every lock a device holds.
    pub fn release_all_for_device(&mut self, device_id: DeviceId) -> Vec<LockRecord> {
        let files: Vec<FileId> = self
            .locks
            .iter()
            .filter(|(_, lock)| lock.owner_device_id == device_id)
            .map(|(file_id, _)| *file_id)
            .collect();
        files
            .into_iter()
            .filter_map(|file_id| self.locks.remove(&file_id))
            .collect()
    }

    /// The live lock for a file, expiring it first if stale.
    pub fn current(&mut self, file_id: FileId, now: u64) -> Option<&LockRecord> {
        self.expire_file(file_id, now);
        self.locks.get(&file_id)
    }

    /// The live lock for a file without releasing a stale one.
    pub fn peek(&self, file_id: FileId, now: u64) -> Option<&LockRecord> {
        self.locks.get(&file_id).filter(|lock| !lock.is_expired(now))
    }

    /// Locks released lazily since the last call.
    pub fn take_lapsed(&mut self) -> Vec<LockRecord> {
        std::mem::take(&mut self.lapsed)
    }

    /// Whether `device_id` holds a live lock on the file.
    pub fn is_held_by(&mut self, file_id: FileId, device_id: DeviceId, now: u64) -> bool {
        self.current(file_id, now)
            .is_some_and(|lock| lock.owner_device_id == device_id)
    }

    /// Sweep every expired lock. Returns what was released.
    pub fn expire(&mut self, now: u64) -> Vec<LockRecord> {
        let stale: Vec<FileId> = self
            .locks
            .iter()
            .filter(|(_, lock)| lock.is_expired(now))
            .map(|(file_id, _)| *file_id)
            .collect();
        stale
            .into_iter()
            .filter_map(|file_id| self.locks.remove(&file_id))
            .collect()
    }

    /// Number of live (unswept) locks.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no locks are held.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn expire_file(&mut self, file_id: FileId, now: u64) {
        if self.locks.get(&file_id).is_some_and(|lock| lock.is_expired(now)) {
            if let Some(lock) = self.locks.remove(&file_id) {
                self.lapsed.push(lock);
            }
        }
    }
}
