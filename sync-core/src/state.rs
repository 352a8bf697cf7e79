//! Per-(device, file) sync state machine.
//!
//! This module provides a pure, side-effect-free state machine for one file
//! on one device. It takes events as input and produces a new state plus a
//! list of actions to execute. The device engine in sync-client performs the
//! actual I/O (snapshots, lock requests, chunk streams) and feeds the
//! outcomes back as events.
//!
//! Decisions depend only on the event sequence. The one random input, retry
//! jitter, only changes when a retry fires.

use crate::backoff::RetryPolicy;
use crate::conflict::Resolution;
use std::time::Duration;
use sync_types::{DeviceId, FileId, FileSyncState, TransferDirection, VersionId, VersionRecord};

/// Per-file behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Take an auto-lock before every push.
    pub require_lock: bool,
    /// Start pulling accepted remote versions immediately.
    pub auto_pull: bool,
    /// Transfer retry policy.
    pub retry: RetryPolicy,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            require_lock: true,
            auto_pull: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// Work interrupted by a blocker, resumed once it clears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pending {
    /// A local version waiting to be pushed.
    Push(VersionRecord),
    /// A remote version waiting to be pulled.
    Pull(VersionRecord),
}

/// Which lock, if any, this device holds on the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockHold {
    /// No lock.
    #[default]
    None,
    /// Auto-lock around the current push.
    Auto,
    /// Manually held lock.
    Manual,
}

/// Sync state of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// Nothing local, nothing known remotely.
    Absent,
    /// A remote version was accepted but not yet fetched.
    AvailableRemote {
        /// The version to fetch.
        remote: VersionRecord,
    },
    /// Fetching a remote version.
    Pulling {
        /// The version being fetched.
        remote: VersionRecord,
        /// Failed attempts so far.
        attempt: u32,
        /// A divergent version that arrived mid-pull.
        deferred: Option<VersionRecord>,
    },
    /// Local content is the head.
    Ready,
    /// Waiting for an auto-lock before pushing.
    Locking {
        /// The version to push.
        version: VersionRecord,
    },
    /// Streaming a local version.
    Pushing {
        /// The version being pushed.
        version: VersionRecord,
        /// Failed attempts so far.
        attempt: u32,
    },
    /// Another device holds the lock.
    LockBlocked {
        /// Lock owner.
        holder: DeviceId,
        /// What to do once it is released.
        pending: Pending,
    },
    /// Divergent heads awaiting a human decision.
    Conflict {
        /// Local candidate.
        local: VersionRecord,
        /// Remote candidate.
        remote: VersionRecord,
        /// Both kept as siblings, head still to be designated.
        kept_both: bool,
    },
    /// Last operation failed; retryable.
    Error {
        /// What went wrong.
        message: String,
        /// What a retry resumes.
        pending: Option<Pending>,
    },
}

impl SyncState {
    /// The externally visible state.
    pub fn kind(&self) -> FileSyncState {
        match self {
            SyncState::Absent => FileSyncState::Absent,
            SyncState::AvailableRemote { .. } => FileSyncState::AvailableRemote,
            SyncState::Pulling { .. } => FileSyncState::Pulling,
            SyncState::Ready => FileSyncState::Ready,
            SyncState::Locking { .. } | SyncState::Pushing { .. } => FileSyncState::Pushing,
            SyncState::LockBlocked { .. } => FileSyncState::LockBlocked,
            SyncState::Conflict { .. } => FileSyncState::Conflict,
            SyncState::Error { .. } => FileSyncState::Error,
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Local content changed; `version` is already described, parented on
    /// [`FileSync::local_parent`].
    LocalChange {
        /// The new local version.
        version: VersionRecord,
    },
    /// A remote version was announced (`file/complete` or a join's head).
    RemoteVersion {
        /// The announced version.
        version: VersionRecord,
        /// The local history shows it descends from the effective head.
        descends_from_head: bool,
        /// The announcing device holds the file lock.
        announcer_holds_lock: bool,
    },
    /// User asked to fetch an available remote version.
    PullRequested,
    /// This device was granted the lock.
    LockGranted {
        /// Whether it is an auto-lock.
        auto: bool,
    },
    /// Lock request refused.
    LockDenied {
        /// Current owner.
        holder: DeviceId,
    },
    /// The file lock was released by whoever held it.
    LockReleased,
    /// Another device now holds the lock.
    LockTaken {
        /// New owner.
        holder: DeviceId,
    },
    /// The authority accepted a pushed version.
    PushAcknowledged {
        /// The accepted version.
        version: VersionId,
    },
    /// The authority refused a pushed version.
    PushRejected {
        /// The refused version.
        version: VersionId,
        /// Refused because this device holds the lock.
        locked_by: Option<DeviceId>,
        /// The authoritative head it diverged from, if known locally.
        remote: Option<VersionRecord>,
    },
    /// A pulled version was verified and written to disk.
    PullCompleted {
        /// The version now on disk.
        version: VersionId,
    },
    /// The current transfer failed or stalled.
    TransferFailed {
        /// What went wrong.
        reason: String,
    },
    /// A scheduled retry is due.
    RetryTimer,
    /// User asked to retry after an error.
    RetryRequested,
    /// Writing to the local filesystem failed.
    ApplyFailed {
        /// What went wrong.
        reason: String,
    },
    /// The user settled a conflict.
    ConflictResolved {
        /// Outcome of the resolution.
        resolution: Resolution,
    },
    /// One of two kept siblings was chosen as head.
    HeadDesignated {
        /// The version that becomes head.
        head: VersionRecord,
        /// It carries local content and must be published.
        publish: bool,
    },
}

/// Instructions for the device engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Append a local version to history as the new head.
    RecordLocalVersion {
        /// The version.
        version: VersionRecord,
    },
    /// Ask the authority for the file lock.
    AcquireLock {
        /// Auto-lock around a single push.
        auto: bool,
    },
    /// Give up the file lock.
    ReleaseLock,
    /// Stream a version to the other members.
    SendVersion {
        /// The version.
        version: VersionRecord,
    },
    /// Fetch a remote version (only missing chunks).
    BeginPull {
        /// The version.
        version: VersionRecord,
    },
    /// Drop the in-flight session for one direction.
    AbandonTransfer {
        /// Push or pull.
        direction: TransferDirection,
    },
    /// Fire [`Event::RetryTimer`] after a delay.
    ScheduleRetry {
        /// Delay before the retry.
        delay: Duration,
    },
    /// Retain both candidates and protect them from eviction.
    RaiseConflict {
        /// Local candidate.
        local: VersionRecord,
        /// Remote candidate.
        remote: VersionRecord,
    },
    /// Emit an event to the application.
    EmitEvent(SyncEvent),
}

/// Events emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Visible state changed.
    StateChanged {
        /// File concerned.
        file_id: FileId,
        /// New state.
        state: FileSyncState,
    },
    /// Local content matches a new head.
    Synced {
        /// File concerned.
        file_id: FileId,
        /// The head.
        head: VersionId,
    },
    /// A push is waiting for another device's lock.
    LockBlocked {
        /// File concerned.
        file_id: FileId,
        /// Lock owner.
        holder: DeviceId,
    },
    /// Divergent heads need a decision.
    ConflictRaised {
        /// File concerned.
        file_id: FileId,
        /// Local candidate.
        local: VersionId,
        /// Remote candidate.
        remote: VersionId,
    },
    /// A local version was overruled by the lock holder's version.
    VersionSuperseded {
        /// File concerned.
        file_id: FileId,
        /// The overruled local version (still retained).
        version: VersionId,
        /// The authoritative version.
        by: VersionId,
    },
    /// A transfer attempt failed.
    TransferFailed {
        /// File concerned.
        file_id: FileId,
        /// What went wrong.
        error: String,
        /// Attempt number.
        attempt: u32,
        /// Whether a retry is scheduled.
        will_retry: bool,
    },
}

/// How an announced remote version relates to the local head.
enum Decision {
    /// Already the head.
    Noop,
    /// Take the remote version as the new head.
    ///
    /// Also taken when the announcer holds the lock, even if the remote
    /// version does not descend from a local edit still waiting to be
    /// pushed. That edit is overridden without a conflict: it only gets a
    /// `VersionSuperseded` event, and its content stays in the local
    /// snapshot store.
    Accept,
    /// Concurrent edits on both sides.
    Diverge,
}

/// State machine for one file on one device - NO I/O, just transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSync {
    file_id: FileId,
    state: SyncState,
    head: Option<VersionRecord>,
    lock: LockHold,
    policy: SyncPolicy,
}

impl FileSync {
    /// A file with no local content.
    pub fn new(file_id: FileId, policy: SyncPolicy) -> Self {
        Self {
            file_id,
            state: SyncState::Absent,
            head: None,
            lock: LockHold::None,
            policy,
        }
    }

    /// A file whose local content is `head`.
    pub fn with_head(file_id: FileId, head: VersionRecord, policy: SyncPolicy) -> Self {
        Self {
            file_id,
            state: SyncState::Ready,
            head: Some(head),
            lock: LockHold::None,
            policy,
        }
    }

    /// File this machine tracks.
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Current state.
    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Head whose content is on disk.
    pub fn head(&self) -> Option<&VersionRecord> {
        self.head.as_ref()
    }

    /// Policy the machine was built with.
    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Lock this device holds.
    pub fn lock(&self) -> LockHold {
        self.lock
    }

    /// The version a new local edit descends from.
    pub fn local_parent(&self) -> Option<&VersionRecord> {
        match &self.state {
            SyncState::Pushing { version, .. }
            | SyncState::Locking { version }
            | SyncState::LockBlocked {
                pending: Pending::Push(version),
                ..
            }
            | SyncState::Error {
                pending: Some(Pending::Push(version)),
                ..
            } => Some(version),
            SyncState::Conflict { local, .. } => Some(local),
            _ => self.head.as_ref(),
        }
    }

    /// The version remote announcements are compared against.
    pub fn effective_head(&self) -> Option<&VersionRecord> {
        match &self.state {
            SyncState::Pulling { remote, .. }
            | SyncState::AvailableRemote { remote }
            | SyncState::LockBlocked {
                pending: Pending::Pull(remote),
                ..
            }
            | SyncState::Error {
                pending: Some(Pending::Pull(remote)),
                ..
            } => Some(remote),
            _ => self.local_parent(),
        }
    }

    /// Process an event and return the new machine plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(mut self, event: Event) -> (Self, Vec<Action>) {
        let before = self.state.kind();
        let state = std::mem::replace(&mut self.state, SyncState::Absent);
        let mut actions = Vec::new();
        self.state = self.step(state, event, &mut actions);
        let after = self.state.kind();
        if after != before {
            actions.push(Action::EmitEvent(SyncEvent::StateChanged {
                file_id: self.file_id,
                state: after,
            }));
        }
        (self, actions)
    }

    fn step(&mut self, state: SyncState, event: Event, out: &mut Vec<Action>) -> SyncState {
        use SyncState as S;
        match event {
            Event::LocalChange { version } => self.on_local_change(state, version, out),

            Event::RemoteVersion {
                version,
                descends_from_head,
                announcer_holds_lock,
            } => self.on_remote_version(state, version, descends_from_head, announcer_holds_lock, out),

            Event::PullRequested => match state {
                S::AvailableRemote { remote } => self.begin_pull(remote, out),
                s => s,
            },

            Event::LockGranted { auto } => {
                self.lock = if auto { LockHold::Auto } else { LockHold::Manual };
                match state {
                    S::Locking { version }
                    | S::LockBlocked {
                        pending: Pending::Push(version),
                        ..
                    } => self.push(version, out),
                    s => {
                        // Auto grant that arrived after the push was abandoned.
                        if auto {
                            self.release_auto_lock(out);
                        }
                        s
                    }
                }
            }

            Event::LockDenied { holder } => match state {
                S::Locking { version } => self.block(holder, version, out),
                s => s,
            },

            Event::LockReleased => {
                self.lock = LockHold::None;
                match state {
                    S::LockBlocked {
                        pending: Pending::Push(version),
                        ..
                    } => self.request_lock(version, out),
                    s => s,
                }
            }

            Event::LockTaken { holder } => {
                self.lock = LockHold::None;
                match state {
                    S::LockBlocked { pending, .. } => S::LockBlocked { holder, pending },
                    s => s,
                }
            }

            Event::PushAcknowledged { version } => match state {
                S::Pushing { version: v, .. } if v.version_id == version => {
                    self.release_auto_lock(out);
                    out.push(Action::EmitEvent(SyncEvent::Synced {
                        file_id: self.file_id,
                        head: v.version_id,
                    }));
                    self.head = Some(v);
                    S::Ready
                }
                s => s,
            },

            Event::PushRejected {
                version,
                locked_by,
                remote,
            } => match state {
                S::Pushing { version: v, .. } if v.version_id == version => {
                    match (locked_by, remote) {
                        (Some(holder), _) => {
                            self.lock = LockHold::None;
                            self.block(holder, v, out)
                        }
                        (None, Some(remote)) => {
                            self.release_auto_lock(out);
                            self.raise_conflict(v, remote, out)
                        }
                        (None, None) => {
                            self.release_auto_lock(out);
                            self.fail("push rejected by relay".into(), Some(Pending::Push(v)), 0, out)
                        }
                    }
                }
                s => s,
            },

            Event::PullCompleted { version } => match state {
                S::Pulling {
                    remote, deferred, ..
                } if remote.version_id == version => {
                    out.push(Action::EmitEvent(SyncEvent::Synced {
                        file_id: self.file_id,
                        head: remote.version_id,
                    }));
                    self.head = Some(remote.clone());
                    match deferred {
                        Some(other) => self.raise_conflict(remote, other, out),
                        None => S::Ready,
                    }
                }
                s => s,
            },

            Event::TransferFailed { reason } => match state {
                S::Pushing { version, attempt } => {
                    if self.policy.retry.can_retry(attempt) {
                        let next = attempt + 1;
                        self.retry_later(reason, next, out);
                        S::Pushing {
                            version,
                            attempt: next,
                        }
                    } else {
                        self.release_auto_lock(out);
                        self.fail(reason, Some(Pending::Push(version)), attempt, out)
                    }
                }
                S::Pulling {
                    remote,
                    attempt,
                    deferred,
                } => {
                    if self.policy.retry.can_retry(attempt) {
                        let next = attempt + 1;
                        self.retry_later(reason, next, out);
                        S::Pulling {
                            remote,
                            attempt: next,
                            deferred,
                        }
                    } else {
                        self.fail(reason, Some(Pending::Pull(remote)), attempt, out)
                    }
                }
                // The lock reply never came; asking again is idempotent.
                S::Locking { version } => self.request_lock(version, out),
                s => s,
            },

            Event::RetryTimer => match state {
                S::Pushing { version, attempt } => {
                    out.push(Action::SendVersion {
                        version: version.clone(),
                    });
                    S::Pushing { version, attempt }
                }
                S::Pulling {
                    remote,
                    attempt,
                    deferred,
                } => {
                    out.push(Action::BeginPull {
                        version: remote.clone(),
                    });
                    S::Pulling {
                        remote,
                        attempt,
                        deferred,
                    }
                }
                s => s,
            },

            Event::RetryRequested => match state {
                S::Error {
                    pending: Some(Pending::Push(version)),
                    ..
                } => self.start_push(version, out),
                S::Error {
                    pending: Some(Pending::Pull(remote)),
                    ..
                } => self.begin_pull(remote, out),
                S::Error { pending: None, .. } => self.idle(),
                S::Locking { version } => self.request_lock(version, out),
                s => s,
            },

            Event::ApplyFailed { reason } => {
                let pending = match state {
                    S::Pulling { remote, .. } | S::AvailableRemote { remote } => {
                        Some(Pending::Pull(remote))
                    }
                    S::Error { pending, .. } => pending,
                    S::LockBlocked { pending, .. } => Some(pending),
                    S::Pushing { version, .. } | S::Locking { version } => {
                        Some(Pending::Push(version))
                    }
                    S::Conflict { .. } | S::Ready | S::Absent => None,
                };
                self.fail(reason, pending, 0, out)
            }

            Event::ConflictResolved { resolution } => match state {
                S::Conflict { .. } => match resolution {
                    Resolution::KeepLocal { head } => self.start_push(head, out),
                    Resolution::TakeRemote { head, .. } => self.begin_pull(head, out),
                    Resolution::KeepBoth { local, remote, .. } => S::Conflict {
                        local,
                        remote,
                        kept_both: true,
                    },
                },
                s => s,
            },

            Event::HeadDesignated { head, publish } => match state {
                S::Conflict {
                    kept_both: true, ..
                } => {
                    if publish {
                        self.start_push(head, out)
                    } else {
                        self.begin_pull(head, out)
                    }
                }
                s => s,
            },
        }
    }

    fn on_local_change(
        &mut self,
        state: SyncState,
        version: VersionRecord,
        out: &mut Vec<Action>,
    ) -> SyncState {
        use SyncState as S;
        out.push(Action::RecordLocalVersion {
            version: version.clone(),
        });
        match state {
            S::Absent | S::Ready => self.start_push(version, out),
            S::Pushing { .. } => {
                out.push(Action::AbandonTransfer {
                    direction: TransferDirection::Push,
                });
                self.push(version, out)
            }
            S::Locking { .. } => S::Locking { version },
            S::LockBlocked { holder, .. } => S::LockBlocked {
                holder,
                pending: Pending::Push(version),
            },
            S::Pulling { remote, .. } => {
                out.push(Action::AbandonTransfer {
                    direction: TransferDirection::Pull,
                });
                self.raise_conflict(version, remote, out)
            }
            S::AvailableRemote { remote }
            | S::Conflict { remote, .. }
            | S::Error {
                pending: Some(Pending::Pull(remote)),
                ..
            } => self.raise_conflict(version, remote, out),
            S::Error { .. } => self.start_push(version, out),
        }
    }

    fn on_remote_version(
        &mut self,
        state: SyncState,
        version: VersionRecord,
        descends_from_head: bool,
        announcer_holds_lock: bool,
        out: &mut Vec<Action>,
    ) -> SyncState {
        use SyncState as S;

        if let S::Conflict {
            local,
            remote,
            kept_both,
        } = state
        {
            // Only a continuation of the remote line replaces the candidate.
            let extends = version.parent_version_id == Some(remote.version_id);
            if version.version_id != remote.version_id
                && version.version_id != local.version_id
                && (extends || announcer_holds_lock)
            {
                return self.raise_conflict(local, version, out);
            }
            return S::Conflict {
                local,
                remote,
                kept_both,
            };
        }

        let decision = match self.effective_head() {
            None => Decision::Accept,
            Some(head) if head.version_id == version.version_id => Decision::Noop,
            Some(head)
                if version.parent_version_id == Some(head.version_id)
                    || descends_from_head
                    || announcer_holds_lock =>
            {
                Decision::Accept
            }
            Some(_) => Decision::Diverge,
        };

        match decision {
            Decision::Noop => state,
            Decision::Accept => {
                match &state {
                    S::Pushing { version: mine, .. }
                    | S::Locking { version: mine }
                    | S::LockBlocked {
                        pending: Pending::Push(mine),
                        ..
                    }
                    | S::Error {
                        pending: Some(Pending::Push(mine)),
                        ..
                    } => {
                        if matches!(state, S::Pushing { .. }) {
                            out.push(Action::AbandonTransfer {
                                direction: TransferDirection::Push,
                            });
                        }
                        let builds_on_mine = version.parent_version_id == Some(mine.version_id)
                            || descends_from_head;
                        if builds_on_mine {
                            self.head = Some(mine.clone());
                        } else {
                            out.push(Action::EmitEvent(SyncEvent::VersionSuperseded {
                                file_id: self.file_id,
                                version: mine.version_id,
                                by: version.version_id,
                            }));
                        }
                        self.release_auto_lock(out);
                    }
                    S::Pulling { .. } => out.push(Action::AbandonTransfer {
                        direction: TransferDirection::Pull,
                    }),
                    _ => {}
                }
                self.accept(version, out)
            }
            Decision::Diverge => match state {
                S::Pulling {
                    remote,
                    attempt,
                    deferred: None,
                } => S::Pulling {
                    remote,
                    attempt,
                    deferred: Some(version),
                },
                s @ S::Pulling { .. } => s,
                other => {
                    if matches!(other, S::Pushing { .. }) {
                        out.push(Action::AbandonTransfer {
                            direction: TransferDirection::Push,
                        });
                    }
                    self.release_auto_lock(out);
                    match self.local_candidate(other) {
                        Some(local) => self.raise_conflict(local, version, out),
                        None => self.accept(version, out),
                    }
                }
            },
        }
    }

    fn local_candidate(&self, state: SyncState) -> Option<VersionRecord> {
        match state {
            SyncState::Pushing { version, .. }
            | SyncState::Locking { version }
            | SyncState::LockBlocked {
                pending: Pending::Push(version),
                ..
            }
            | SyncState::Error {
                pending: Some(Pending::Push(version)),
                ..
            } => Some(version),
            _ => self.head.clone(),
        }
    }

    fn accept(&mut self, version: VersionRecord, out: &mut Vec<Action>) -> SyncState {
        if self.policy.auto_pull {
            out.push(Action::EmitEvent(SyncEvent::StateChanged {
                file_id: self.file_id,
                state: FileSyncState::AvailableRemote,
            }));
            self.begin_pull(version, out)
        } else {
            SyncState::AvailableRemote { remote: version }
        }
    }

    fn begin_pull(&mut self, version: VersionRecord, out: &mut Vec<Action>) -> SyncState {
        out.push(Action::BeginPull {
            version: version.clone(),
        });
        SyncState::Pulling {
            remote: version,
            attempt: 0,
            deferred: None,
        }
    }

    fn start_push(&mut self, version: VersionRecord, out: &mut Vec<Action>) -> SyncState {
        if self.policy.require_lock && self.lock == LockHold::None {
            self.request_lock(version, out)
        } else {
            self.push(version, out)
        }
    }

    fn request_lock(&mut self, version: VersionRecord, out: &mut Vec<Action>) -> SyncState {
        out.push(Action::AcquireLock { auto: true });
        SyncState::Locking { version }
    }

    fn push(&mut self, version: VersionRecord, out: &mut Vec<Action>) -> SyncState {
        out.push(Action::SendVersion {
            version: version.clone(),
        });
        SyncState::Pushing {
            version,
            attempt: 0,
        }
    }

    fn block(&mut self, holder: DeviceId, version: VersionRecord, out: &mut Vec<Action>) -> SyncState {
        out.push(Action::EmitEvent(SyncEvent::LockBlocked {
            file_id: self.file_id,
            holder,
        }));
        SyncState::LockBlocked {
            holder,
            pending: Pending::Push(version),
        }
    }

    fn raise_conflict(
        &mut self,
        local: VersionRecord,
        remote: VersionRecord,
        out: &mut Vec<Action>,
    ) -> SyncState {
        out.push(Action::RaiseConflict {
            local: local.clone(),
            remote: remote.clone(),
        });
        out.push(Action::EmitEvent(SyncEvent::ConflictRaised {
            file_id: self.file_id,
            local: local.version_id,
            remote: remote.version_id,
        }));
        SyncState::Conflict {
            local,
            remote,
            kept_both: false,
        }
    }

    fn retry_later(&mut self, reason: String, attempt: u32, out: &mut Vec<Action>) {
        out.push(Action::EmitEvent(SyncEvent::TransferFailed {
            file_id: self.file_id,
            error: reason,
            attempt,
            will_retry: true,
        }));
        out.push(Action::ScheduleRetry {
            delay: self.policy.retry.backoff(attempt),
        });
    }

    fn fail(
        &mut self,
        message: String,
        pending: Option<Pending>,
        attempt: u32,
        out: &mut Vec<Action>,
    ) -> SyncState {
        out.push(Action::EmitEvent(SyncEvent::TransferFailed {
            file_id: self.file_id,
            error: message.clone(),
            attempt,
            will_retry: false,
        }));
        SyncState::Error { message, pending }
    }

    fn release_auto_lock(&mut self, out: &mut Vec<Action>) {
        if self.lock == LockHold::Auto {
            self.lock = LockHold::None;
            out.push(Action::ReleaseLock);
        }
    }

    fn idle(&self) -> SyncState {
        if self.head.is_some() {
            SyncState::Ready
        } else {
            SyncState::Absent
        }
    }
}
