//! Executing state machine actions.
//!
//! Every action's outcome that matters to the machine comes back as a
//! follow-up [`Event`], queued behind the actions of the current step.
//! Failures never escape: they become `TransferFailed` or `ApplyFailed`.

use super::context::FileContext;
use super::{RetryDue, SyncEngine};
use crate::registry::LocalRegistry;
use crate::transport::Transport;
use std::collections::VecDeque;
use std::path::Path;
use sync_content::BlobStore;
use sync_core::{describe, open_inbound, Action, Event, InboundTransfer, OutboundTransfer};
use sync_types::{
    unix_timestamp, ChunkRequest, ContentHash, FileComplete, FileStateReport, Hydration,
    LockAcquire, LockMode, LockRelease, Message, TransferDirection, VersionRecord,
};
use tracing::{debug, info, warn};

impl<T: Transport, R: LocalRegistry, S: BlobStore> SyncEngine<T, R, S> {
    /// Run an event through the file's machine, executing actions until no
    /// follow-up events remain.
    pub(super) async fn dispatch(&self, ctx: &mut FileContext, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let (machine, actions) = ctx.machine.clone().on_event(event);
            ctx.machine = machine;
            for action in actions {
                if let Some(next) = self.execute(ctx, action).await {
                    queue.push_back(next);
                }
            }
        }
        self.report(ctx).await;
    }

    async fn execute(&self, ctx: &mut FileContext, action: Action) -> Option<Event> {
        match action {
            Action::RecordLocalVersion { version } => {
                if let Err(e) = ctx.set_head(&version) {
                    warn!(file = %ctx.file_id, "Could not record local version: {}", e);
                }
                None
            }

            Action::AcquireLock { auto } => {
                ctx.transfer_started = unix_timestamp();
                let request = Message::LockAcquire(LockAcquire {
                    file_id: ctx.file_id,
                    device_id: self.device_id,
                    user_id: self.config.device.user_id.clone(),
                    mode: LockMode::Exclusive,
                    auto_lock: auto,
                });
                match self.send(request).await {
                    Ok(()) => None,
                    Err(e) => Some(Event::ApplyFailed {
                        reason: format!("lock request failed: {}", e),
                    }),
                }
            }

            Action::ReleaseLock => {
                let release = Message::LockRelease(LockRelease {
                    file_id: ctx.file_id,
                    device_id: self.device_id,
                    mode: LockMode::Exclusive,
                });
                if let Err(e) = self.send(release).await {
                    // The relay drops our locks when the connection goes.
                    debug!(file = %ctx.file_id, "Lock release not sent: {}", e);
                }
                None
            }

            Action::SendVersion { version } => self.send_version(ctx, version).await,

            Action::BeginPull { version } => self.begin_pull(ctx, version).await,

            Action::AbandonTransfer { direction } => {
                match direction {
                    TransferDirection::Push => ctx.outbound = None,
                    // Verified chunks stay; a later pull of the same version
                    // or a conflict resolution reuses them.
                    TransferDirection::Pull => {}
                }
                debug!(file = %ctx.file_id, ?direction, "Transfer abandoned");
                None
            }

            Action::ScheduleRetry { delay } => {
                ctx.retry_generation += 1;
                let due = RetryDue {
                    file_id: ctx.file_id,
                    generation: ctx.retry_generation,
                };
                let timers = self.timers.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = timers.send(due);
                });
                None
            }

            Action::RaiseConflict { local, remote } => {
                warn!(
                    file = %ctx.file_id,
                    local = %local.version_id,
                    remote = %remote.version_id,
                    "Conflict"
                );
                if let Err(e) = ctx.remember(&remote) {
                    warn!(file = %ctx.file_id, "Conflict candidate not retained: {}", e);
                }
                let candidates = sync_core::ConflictCandidates { local, remote };
                if let Err(e) = sync_core::retain_candidates(&mut ctx.history, &candidates) {
                    warn!(file = %ctx.file_id, "Conflict candidates not pinned: {}", e);
                }
                let remote = candidates.remote.clone();
                ctx.conflict = Some(candidates);
                ctx.siblings = None;
                self.ensure_content(ctx, &remote).await;
                None
            }

            Action::EmitEvent(event) => {
                // No subscribers is fine.
                let _ = self.events.send(event);
                None
            }
        }
    }

    async fn send_version(&self, ctx: &mut FileContext, version: VersionRecord) -> Option<Event> {
        let content = match self.snapshots.get(ctx.file_id, version.version_id).await {
            Ok(content) => content,
            Err(e) => {
                return Some(Event::TransferFailed {
                    reason: format!("no snapshot to push: {}", e),
                })
            }
        };
        let mut outbound = match ctx.outbound.take() {
            Some(mut existing) if existing.record().version_id == version.version_id => {
                existing.record_retry();
                existing
            }
            _ => OutboundTransfer::new(version.clone(), self.device_id),
        };
        ctx.transfer_started = unix_timestamp();

        let frames = match outbound.frames(&content, None, version.timestamp, None) {
            Ok(frames) => frames,
            Err(e) => {
                return Some(Event::TransferFailed {
                    reason: e.to_string(),
                })
            }
        };
        debug!(
            file = %ctx.file_id,
            version = %version.version_id,
            chunks = frames.len(),
            attempt = outbound.retry_count(),
            "Pushing version"
        );
        for chunk in frames {
            if let Err(e) = self.send(Message::FileChunk(chunk)).await {
                ctx.outbound = Some(outbound);
                return Some(Event::TransferFailed {
                    reason: e.to_string(),
                });
            }
        }
        let complete = Message::FileComplete(FileComplete {
            file_id: ctx.file_id,
            mtime: version.timestamp,
            version,
            to: None,
        });
        let result = self.send(complete).await;
        ctx.outbound = Some(outbound);
        result.err().map(|e| Event::TransferFailed {
            reason: e.to_string(),
        })
    }

    /// Start or resume a pull, asking only for chunks not yet held.
    async fn begin_pull(&self, ctx: &mut FileContext, version: VersionRecord) -> Option<Event> {
        ctx.transfer_started = unix_timestamp();
        if let Err(e) = ctx.remember(&version) {
            debug!(file = %ctx.file_id, "Pulled version not in window: {}", e);
        }
        if let Some(content) = self.local_content(&version).await {
            return self.commit(ctx, &version, content).await;
        }

        let now = unix_timestamp();
        let resumed = ctx
            .inbound
            .as_ref()
            .is_some_and(|i| i.version() == version.version_id);
        let incoming =
            InboundTransfer::for_record(&version, version.origin_device_id, self.device_id, now);
        if let Some(old) = open_inbound(&mut ctx.inbound, incoming) {
            debug!(file = %ctx.file_id, version = %old.version(), "Discarding partial transfer");
        }
        let inbound = ctx.inbound.as_mut()?;
        let dropped = inbound.set_expected(&version);
        if !dropped.is_empty() {
            warn!(file = %ctx.file_id, ?dropped, "Dropped chunks that disagree with the version");
        }
        if inbound.is_complete() {
            return self.finish_pull(ctx).await;
        }
        if resumed {
            inbound.record_retry(now);
        }

        let missing = inbound.missing();
        debug!(
            file = %ctx.file_id,
            version = %version.version_id,
            missing = missing.len(),
            "Requesting chunks"
        );
        let request = Message::ChunkRequest(ChunkRequest {
            file_id: ctx.file_id,
            version: version.version_id,
            seqs: missing,
            requester: self.device_id,
            holder: None,
        });
        self.send(request)
            .await
            .err()
            .map(|e| Event::TransferFailed {
                reason: e.to_string(),
            })
    }

    /// Assemble a complete inbound transfer and apply it.
    pub(super) async fn finish_pull(&self, ctx: &mut FileContext) -> Option<Event> {
        let inbound = ctx.inbound.as_mut()?;
        if !inbound.is_complete() {
            return None;
        }
        let version_id = inbound.version();
        let record = ctx
            .pulling()
            .filter(|r| r.version_id == version_id)
            .cloned()
            .or_else(|| ctx.history.get(version_id).cloned())?;

        let inbound = ctx.inbound.as_mut()?;
        match inbound.assemble() {
            Ok(content) => {
                ctx.inbound = None;
                self.commit(ctx, &record, content).await
            }
            Err(e) => {
                warn!(file = %ctx.file_id, version = %version_id, "Integrity check failed: {}", e);
                Some(Event::TransferFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Write a verified version to disk and make it the head.
    ///
    /// The received content is snapshotted first. If the disk holds an edit
    /// no version records, that edit is recorded instead and the machine
    /// turns the pull into a conflict; nothing on disk is overwritten.
    async fn commit(
        &self,
        ctx: &mut FileContext,
        record: &VersionRecord,
        content: Vec<u8>,
    ) -> Option<Event> {
        let file_id = ctx.file_id;
        if let Err(e) = self.snapshots.put(record, &content).await {
            return Some(Event::ApplyFailed {
                reason: format!("snapshot failed: {}", e),
            });
        }

        match tokio::fs::read(&ctx.path).await {
            Ok(current) => {
                let hash = ContentHash::of(&current);
                let recorded = hash == record.content_hash
                    || ctx.history.records().any(|r| r.content_hash == hash);
                if !recorded {
                    let version = describe(
                        file_id,
                        ctx.machine.local_parent().map(|v| v.version_id),
                        self.device_id,
                        unix_timestamp(),
                        &current,
                        self.config.chunk_size(),
                    );
                    if let Err(e) = self.snapshots.put(&version, &current).await {
                        return Some(Event::ApplyFailed {
                            reason: format!("snapshot failed: {}", e),
                        });
                    }
                    info!(file = %file_id, "Unrecorded local edit found before applying a pull");
                    return Some(Event::LocalChange { version });
                }
                // Make sure the content being replaced can be restored.
                if let Some(head) = ctx.machine.head() {
                    if head.content_hash == hash
                        && !self.snapshots.contains(file_id, head.version_id).await
                    {
                        if let Err(e) = self.snapshots.put(head, &current).await {
                            warn!(file = %file_id, "Pre-write snapshot failed: {}", e);
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Some(Event::ApplyFailed {
                    reason: format!("cannot read {}: {}", ctx.path.display(), e),
                })
            }
        }

        if let Err(e) = write_atomic(&ctx.path, &content).await {
            return Some(Event::ApplyFailed {
                reason: format!("cannot write {}: {}", ctx.path.display(), e),
            });
        }
        if let Err(e) = ctx.set_head(record) {
            warn!(file = %file_id, "Pulled head not recorded: {}", e);
        }
        info!(file = %file_id, version = %record.version_id, "Applied remote version");
        Some(Event::PullCompleted {
            version: record.version_id,
        })
    }

    /// Content for a version already held locally, linking it when the same
    /// bytes are stored under another version.
    async fn local_content(&self, version: &VersionRecord) -> Option<Vec<u8>> {
        if !self
            .snapshots
            .contains(version.file_id, version.version_id)
            .await
        {
            self.snapshots.link(version).await.ok()?;
        }
        self.snapshots
            .get(version.file_id, version.version_id)
            .await
            .ok()
    }

    /// Make sure a conflict candidate's content is held, requesting missing
    /// chunks if not. Returns whether it is available now.
    pub(super) async fn ensure_content(&self, ctx: &mut FileContext, version: &VersionRecord) -> bool {
        if self.local_content(version).await.is_some() {
            return true;
        }
        let now = unix_timestamp();
        let incoming =
            InboundTransfer::for_record(version, version.origin_device_id, self.device_id, now);
        open_inbound(&mut ctx.inbound, incoming);
        let Some(inbound) = ctx.inbound.as_mut() else {
            return false;
        };
        inbound.set_expected(version);
        if inbound.is_complete() {
            match inbound.assemble() {
                Ok(content) => {
                    ctx.inbound = None;
                    return self.snapshots.put(version, &content).await.is_ok();
                }
                Err(e) => warn!(file = %ctx.file_id, "Candidate failed verification: {}", e),
            }
        }
        let Some(inbound) = ctx.inbound.as_ref() else {
            return false;
        };
        let request = Message::ChunkRequest(ChunkRequest {
            file_id: ctx.file_id,
            version: version.version_id,
            seqs: inbound.missing(),
            requester: self.device_id,
            holder: None,
        });
        if let Err(e) = self.send(request).await {
            debug!(file = %ctx.file_id, "Candidate chunk request not sent: {}", e);
        }
        false
    }

    /// Tell the relay about a changed state and keep the registry in step.
    pub(super) async fn report(&self, ctx: &mut FileContext) {
        let state = ctx.machine.state().kind();
        let head = ctx.machine.head().map(|v| v.version_id);
        if ctx.reported == Some((state, head)) {
            return;
        }
        ctx.reported = Some((state, head));
        let error = ctx.error();

        if self.transport.is_connected() {
            let report = Message::FileState(FileStateReport {
                file_id: ctx.file_id,
                state,
                head,
                error: error.clone(),
            });
            if let Err(e) = self.send(report).await {
                debug!(file = %ctx.file_id, "State report not sent: {}", e);
            }
        }

        match self.registry.get(ctx.file_id).await {
            Ok(Some(mut entry)) => {
                entry.head_version_id = head;
                entry.hydration = if head.is_some() {
                    Hydration::FullyPresent
                } else {
                    Hydration::Absent
                };
                entry.last_error = error;
                if let Err(e) = self.registry.update(entry).await {
                    warn!(file = %ctx.file_id, "Registry update failed: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(file = %ctx.file_id, "Registry read failed: {}", e),
        }
    }
}

/// Replace a file's content via a temporary sibling and a rename.
pub(super) async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.atrius.tmp", name));
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Modification time in Unix seconds, 0 if unavailable.
pub(super) fn mtime_secs(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}
