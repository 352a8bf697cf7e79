//! Relay-side authority for file heads, locks and presence.
//!
//! The [`Coordinator`] is a plain message-in, messages-out object. The relay
//! feeds it every decoded message together with the sending device and the
//! current time, then delivers the returned [`Outgoing`] messages. All head
//! and lock decisions for a file happen inside one `&mut self` call, so two
//! racing pushes or lock requests always resolve to a single winner.

use crate::error::{Result, SyncError};
use crate::history::{RetentionPolicy, VersionHistory};
use crate::lock::{LockCoordinator, LockRequest};
use crate::presence::PresenceRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use sync_types::{
    ChunkRequest, DeviceFileState, DeviceId, DeviceRegistered, FileAck, FileChunk, FileComplete,
    FileError, FileId, FileRecord, FileRegister, FileRegistered, FileStateReport, FileSyncState,
    LockAcquire, LockDenied, LockMode, LockRecord, LockRelease, LockState, Message,
    PresenceUpdate,
};

/// Authority settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Version window kept per file.
    #[serde(default)]
    pub retention: RetentionPolicy,
    /// Lifetime of manual locks in seconds; `None` never expires.
    #[serde(default)]
    pub lock_ttl_secs: Option<u64>,
    /// Lifetime of auto-locks in seconds.
    #[serde(default = "default_auto_lock_ttl")]
    pub auto_lock_ttl_secs: Option<u64>,
}

fn default_auto_lock_ttl() -> Option<u64> {
    Some(300)
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            lock_ttl_secs: None,
            auto_lock_ttl_secs: default_auto_lock_ttl(),
        }
    }
}

/// A message addressed to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Recipient.
    pub to: DeviceId,
    /// Message to deliver.
    pub message: Message,
}

#[derive(Debug, Clone)]
struct RelayFile {
    origin: DeviceId,
    created_at: u64,
    history: VersionHistory,
    states: BTreeMap<DeviceId, DeviceFileState>,
}

impl RelayFile {
    fn state_mut(&mut self, device: DeviceId, now: u64) -> &mut DeviceFileState {
        let state = self
            .states
            .entry(device)
            .or_insert_with(|| DeviceFileState::new(device, now));
        state.last_seen_at = now;
        state
    }
}

/// Authoritative state for every file the relay has seen.
#[derive(Debug, Default)]
pub struct Coordinator {
    config: CoordinatorConfig,
    presence: PresenceRegistry,
    locks: LockCoordinator,
    files: HashMap<FileId, RelayFile>,
}

impl Coordinator {
    /// Empty authority.
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Load persisted file records. Locks and memberships are not restored;
    /// every known device state is marked stale until it re-registers.
    pub fn restore(&mut self, records: Vec<FileRecord>) -> Result<usize> {
        let mut restored = 0;
        for record in records {
            record.validate()?;
            let history = VersionHistory::restore(
                record.file_id,
                record.versions,
                record.head_version_id,
                self.config.retention.clone(),
            )?;
            let states = record
                .device_states
                .into_iter()
                .map(|mut s| {
                    s.stale = true;
                    (s.device_id, s)
                })
                .collect();
            self.files.insert(
                record.file_id,
                RelayFile {
                    origin: record.origin_device_id,
                    created_at: record.created_at,
                    history,
                    states,
                },
            );
            restored += 1;
        }
        Ok(restored)
    }

    /// Presence registry (read-only).
    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Number of files known.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Number of live locks.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Open a device session, minting an identity when none is offered.
    pub fn register_device(
        &mut self,
        requested: Option<DeviceId>,
        name: Option<String>,
        now: u64,
    ) -> (DeviceId, Vec<Outgoing>) {
        let device_id = requested.unwrap_or_else(DeviceId::random);
        self.presence.register(device_id, name, now);
        let reply = Outgoing {
            to: device_id,
            message: Message::DeviceRegistered(DeviceRegistered { device_id }),
        };
        (device_id, vec![reply])
    }

    /// Apply one message from a registered device.
    ///
    /// Locks found expired while handling are announced as released ahead of
    /// the handler's own replies.
    pub fn handle(&mut self, from: DeviceId, message: Message, now: u64) -> Vec<Outgoing> {
        self.presence.touch(from, now);
        let out = self.dispatch(from, message, now);
        self.with_lapsed(out)
    }

    fn dispatch(&mut self, from: DeviceId, message: Message, now: u64) -> Vec<Outgoing> {
        match message {
            Message::DeviceRegister(_) => vec![Outgoing {
                to: from,
                message: Message::DeviceRegistered(DeviceRegistered { device_id: from }),
            }],
            Message::FileRegister(m) => self.on_file_register(from, m, now),
            Message::LockAcquire(m) => self.on_lock_acquire(from, m, now),
            Message::LockRelease(m) => self.on_lock_release(from, m, now),
            Message::FileChunk(m) => self.on_chunk(from, m),
            Message::FileComplete(m) => self.on_complete(from, m, now),
            Message::ChunkRequest(m) => self.on_chunk_request(from, m, now),
            Message::FileState(m) => {
                self.on_file_state(from, m, now);
                Vec::new()
            }
            Message::FileError(m) => match m.file_id {
                Some(file_id) => self.fan_out(file_id, Some(from), Message::FileError(m)),
                None => Vec::new(),
            },
            Message::Bye(_) => self.disconnect(from, now),
            other => vec![error_to(
                from,
                other.file_id(),
                format!("unexpected {} from a device", other.kind()),
            )],
        }
    }

    /// Drop a device: release its locks and tell the remaining members.
    pub fn disconnect(&mut self, device: DeviceId, now: u64) -> Vec<Outgoing> {
        let departure = self.presence.disconnect(device, &mut self.locks);
        let mut out = Vec::new();
        for lock in departure.released_locks {
            out.extend(self.fan_out(
                lock.file_id,
                None,
                Message::LockState(LockState {
                    file_id: lock.file_id,
                    owner: None,
                }),
            ));
        }
        for file_id in departure.files {
            if let Some(file) = self.files.get_mut(&file_id) {
                file.state_mut(device, now).stale = true;
            }
            let members = self.presence.members(file_id);
            out.extend(self.fan_out(
                file_id,
                None,
                Message::PresenceUpdate(PresenceUpdate { file_id, members }),
            ));
        }
        self.with_lapsed(out)
    }

    /// Release every expired lock and announce the releases.
    pub fn sweep_expired_locks(&mut self, now: u64) -> Vec<Outgoing> {
        let expired = self.locks.expire(now);
        let mut out = Vec::new();
        for lock in expired {
            out.extend(self.broadcast_lock(lock.file_id, None));
        }
        self.with_lapsed(out)
    }

    /// Snapshot of one file for persistence or inspection.
    ///
    /// An expired lock is left out of the snapshot but stays in the table so
    /// the next handler or sweep announces its release.
    pub fn file_record(&self, file_id: FileId, now: u64) -> Option<FileRecord> {
        let lock = self.locks.peek(file_id, now).cloned();
        let file = self.files.get(&file_id)?;
        Some(FileRecord {
            file_id,
            origin_device_id: file.origin,
            created_at: file.created_at,
            head_version_id: file.history.head_id(),
            versions: file.history.records().cloned().collect(),
            lock,
            device_states: file.states.values().cloned().collect(),
        })
    }

    /// Ids of every known file.
    pub fn file_ids(&self) -> Vec<FileId> {
        self.files.keys().copied().collect()
    }

    fn on_file_register(&mut self, from: DeviceId, m: FileRegister, now: u64) -> Vec<Outgoing> {
        let file_id = m.file_id;
        let retention = self.config.retention.clone();
        let file = self.files.entry(file_id).or_insert_with(|| RelayFile {
            origin: from,
            created_at: now,
            history: VersionHistory::new(file_id, retention),
            states: BTreeMap::new(),
        });
        file.state_mut(from, now).stale = false;
        let version = file.history.head().cloned();
        let history = file.history.records().cloned().collect();

        let members = self.presence.join(file_id, from);
        let lock = self.locks.current(file_id, now).cloned();

        let mut out = vec![Outgoing {
            to: from,
            message: Message::FileRegistered(FileRegistered {
                file_id,
                members: members.clone(),
                version,
                history,
                lock,
            }),
        }];
        out.extend(self.fan_out(
            file_id,
            Some(from),
            Message::PresenceUpdate(PresenceUpdate { file_id, members }),
        ));
        out
    }

    fn on_lock_acquire(&mut self, from: DeviceId, m: LockAcquire, now: u64) -> Vec<Outgoing> {
        if let Err(e) = self.check_member(m.file_id, from) {
            return vec![error_to(from, Some(m.file_id), e.to_string())];
        }
        if m.device_id != from {
            return vec![error_to(
                from,
                Some(m.file_id),
                "lock requests must name the sending device".into(),
            )];
        }
        let ttl_secs = if m.auto_lock {
            self.config.auto_lock_ttl_secs
        } else {
            self.config.lock_ttl_secs
        };
        let request = LockRequest {
            file_id: m.file_id,
            device_id: from,
            user_id: m.user_id,
            mode: m.mode,
            auto_lock: m.auto_lock,
            ttl_secs,
        };
        match self.locks.acquire(request, now) {
            Ok(grant) => self.broadcast_lock(m.file_id, Some(grant.lock)),
            Err(denial) => vec![Outgoing {
                to: from,
                message: Message::LockDenied(LockDenied {
                    file_id: m.file_id,
                    holder: denial.holder,
                    acquired_at: denial.acquired_at,
                }),
            }],
        }
    }

    fn on_lock_release(&mut self, from: DeviceId, m: LockRelease, now: u64) -> Vec<Outgoing> {
        let released = match m.mode {
            LockMode::Override if self.presence.is_member(m.file_id, from) => {
                self.locks.force_release(m.file_id)
            }
            _ => self.locks.release(m.file_id, from, now),
        };
        match released {
            Some(_) => self.broadcast_lock(m.file_id, None),
            None => {
                // Not the owner: resync the requester with the live lock.
                let owner = self.locks.current(m.file_id, now).cloned();
                vec![Outgoing {
                    to: from,
                    message: Message::LockState(LockState {
                        file_id: m.file_id,
                        owner,
                    }),
                }]
            }
        }
    }

    fn on_chunk(&mut self, from: DeviceId, chunk: FileChunk) -> Vec<Outgoing> {
        let file_id = chunk.file_id;
        if let Err(e) = self.check_member(file_id, from) {
            return vec![error_to(from, Some(file_id), e.to_string())];
        }
        match chunk.to {
            Some(to) if self.presence.is_member(file_id, to) => vec![Outgoing {
                to,
                message: Message::FileChunk(chunk),
            }],
            Some(_) => Vec::new(),
            None => self.fan_out(file_id, Some(from), Message::FileChunk(chunk)),
        }
    }

    fn on_complete(&mut self, from: DeviceId, m: FileComplete, now: u64) -> Vec<Outgoing> {
        let file_id = m.file_id;
        if let Err(e) = self.check_member(file_id, from) {
            return vec![error_to(from, Some(file_id), e.to_string())];
        }

        // Targeted completes answer a chunk request; the head decision was
        // already made when the version was first announced.
        if let Some(to) = m.to {
            if self.presence.is_member(file_id, to) {
                return vec![Outgoing {
                    to,
                    message: Message::FileComplete(m),
                }];
            }
            return Vec::new();
        }

        let version_id = m.version.version_id;
        let lock = self.locks.current(file_id, now).cloned();
        let Some(file) = self.files.get_mut(&file_id) else {
            return vec![error_to(from, Some(file_id), SyncError::UnknownFile(file_id).to_string())];
        };
        let head = file.history.head_id();

        if file.history.contains(version_id) {
            let accepted = head == Some(version_id);
            return vec![ack(file_id, version_id, accepted, head, None, None, from)];
        }

        if let Some(lock) = lock.as_ref().filter(|l| l.owner_device_id != from) {
            let holder = lock.owner_device_id;
            let reason = SyncError::LockDenied { file_id, holder }.to_string();
            return vec![
                ack(file_id, version_id, false, head, Some(holder), Some(reason.clone()), from),
                error_to(from, Some(file_id), reason),
            ];
        }

        let holds_lock = lock.is_some();
        let fast_forward = m.version.parent_version_id == head;
        let mut out = Vec::new();

        if fast_forward || holds_lock {
            match file.history.append_head(m.version.clone()) {
                Ok(_) => {
                    let state = file.state_mut(from, now);
                    state.known_head_version_id = Some(version_id);
                    state.state = FileSyncState::Ready;
                    state.last_error = None;
                    out.push(ack(file_id, version_id, true, Some(version_id), None, None, from));
                }
                Err(e) => {
                    return vec![ack(file_id, version_id, false, head, None, Some(e.to_string()), from)];
                }
            }
        } else {
            // Divergent: keep the sibling so the conflict can be resolved
            // later, and let every member see it.
            let retained = file.history.append(m.version.clone());
            let reason = match retained {
                Ok(_) => SyncError::DivergentHead {
                    version: version_id,
                    head,
                }
                .to_string(),
                Err(e) => e.to_string(),
            };
            out.push(ack(file_id, version_id, false, head, None, Some(reason), from));
        }

        out.extend(self.fan_out(file_id, Some(from), Message::FileComplete(m)));
        out
    }

    fn on_chunk_request(&mut self, from: DeviceId, m: ChunkRequest, now: u64) -> Vec<Outgoing> {
        let file_id = m.file_id;
        if let Err(e) = self.check_member(file_id, from) {
            return vec![error_to(from, Some(file_id), e.to_string())];
        }
        let holder = self.pick_holder(&m, from);
        match holder {
            Some(holder) => {
                if let Some(file) = self.files.get_mut(&file_id) {
                    file.state_mut(from, now).state = FileSyncState::Pulling;
                }
                vec![Outgoing {
                    to: holder,
                    message: Message::ChunkRequest(ChunkRequest {
                        holder: Some(holder),
                        requester: from,
                        ..m
                    }),
                }]
            }
            None => vec![error_to(
                from,
                Some(file_id),
                format!("no connected device holds version {}", m.version),
            )],
        }
    }

    fn pick_holder(&self, m: &ChunkRequest, from: DeviceId) -> Option<DeviceId> {
        let usable = |d: DeviceId| d != from && self.presence.is_member(m.file_id, d);
        if let Some(h) = m.holder.filter(|h| usable(*h)) {
            return Some(h);
        }
        let file = self.files.get(&m.file_id)?;
        if let Some(origin) = file
            .history
            .get(m.version)
            .map(|r| r.origin_device_id)
            .filter(|o| usable(*o))
        {
            return Some(origin);
        }
        file.states
            .values()
            .filter(|s| !s.stale && s.known_head_version_id == Some(m.version))
            .map(|s| s.device_id)
            .find(|d| usable(*d))
    }

    fn on_file_state(&mut self, from: DeviceId, m: FileStateReport, now: u64) {
        if !self.presence.is_member(m.file_id, from) {
            return;
        }
        if let Some(file) = self.files.get_mut(&m.file_id) {
            let state = file.state_mut(from, now);
            state.state = m.state;
            state.known_head_version_id = m.head;
            state.last_error = m.error;
        }
    }

    fn check_member(&self, file_id: FileId, device: DeviceId) -> Result<()> {
        if !self.files.contains_key(&file_id) {
            return Err(SyncError::UnknownFile(file_id));
        }
        if !self.presence.is_member(file_id, device) {
            return Err(SyncError::NotAMember { file_id, device });
        }
        Ok(())
    }

    /// Prefix `out` with a release notice for every lazily expired lock.
    fn with_lapsed(&mut self, out: Vec<Outgoing>) -> Vec<Outgoing> {
        let lapsed = self.locks.take_lapsed();
        if lapsed.is_empty() {
            return out;
        }
        let mut notices = Vec::new();
        for lock in lapsed {
            notices.extend(self.broadcast_lock(lock.file_id, None));
        }
        notices.extend(out);
        notices
    }

    fn broadcast_lock(&self, file_id: FileId, owner: Option<LockRecord>) -> Vec<Outgoing> {
        self.fan_out(file_id, None, Message::LockState(LockState { file_id, owner }))
    }

    fn fan_out(&self, file_id: FileId, exclude: Option<DeviceId>, message: Message) -> Vec<Outgoing> {
        self.presence
            .members(file_id)
            .into_iter()
            .filter(|d| Some(*d) != exclude)
            .map(|to| Outgoing {
                to,
                message: message.clone(),
            })
            .collect()
    }
}

fn ack(
    file_id: FileId,
    version: sync_types::VersionId,
    accepted: bool,
    head: Option<sync_types::VersionId>,
    locked_by: Option<DeviceId>,
    reason: Option<String>,
    to: DeviceId,
) -> Outgoing {
    Outgoing {
        to,
        message: Message::FileAck(FileAck {
            file_id,
            version,
            accepted,
            head,
            locked_by,
            reason,
        }),
    }
}

fn error_to(to: DeviceId, file_id: Option<FileId>, message: String) -> Outgoing {
    Outgoing {
        to,
        message: Message::FileError(FileError { file_id, message }),
    }
}
