//! Handling messages from the relay.

use super::context::FileContext;
use super::SyncEngine;
use crate::registry::LocalRegistry;
use crate::transport::Transport;
use sync_content::BlobStore;
use sync_core::{
    open_inbound, ChunkOutcome, Event, FileSync, InboundTransfer, OutboundTransfer, SyncState,
};
use sync_types::{
    unix_timestamp, ChunkRequest, FileAck, FileChunk, FileComplete, FileError, FileRegistered,
    LockRecord, Message, VersionRecord,
};
use tracing::{debug, info, warn};

impl<T: Transport, R: LocalRegistry, S: BlobStore> SyncEngine<T, R, S> {
    /// Apply one message from the relay.
    ///
    /// Messages for files this device does not track are dropped.
    pub async fn handle_message(&self, message: Message) {
        let kind = message.kind();
        let Some(file_id) = message.file_id() else {
            match message {
                Message::Bye(bye) => info!("Relay said goodbye: {:?}", bye.reason),
                Message::FileError(err) => warn!("Relay error: {}", err.message),
                other => debug!("Ignoring {}", other.kind()),
            }
            return;
        };
        let Some(ctx) = self.context(file_id) else {
            debug!(file = %file_id, "Ignoring {} for untracked file", kind);
            return;
        };
        let mut ctx = ctx.lock().await;

        match message {
            Message::FileRegistered(m) => self.on_registered(&mut ctx, m).await,
            Message::PresenceUpdate(m) => {
                debug!(file = %file_id, members = m.members.len(), "Presence update");
                ctx.members = m.members;
            }
            Message::LockState(m) => {
                let event = self.lock_event(m.owner.as_ref());
                ctx.lock = m.owner;
                self.dispatch(&mut ctx, event).await;
            }
            Message::LockDenied(m) => {
                info!(file = %file_id, holder = %m.holder, "Lock denied");
                self.dispatch(&mut ctx, Event::LockDenied { holder: m.holder })
                    .await;
            }
            Message::FileChunk(chunk) => self.on_chunk(&mut ctx, chunk).await,
            Message::FileComplete(m) => self.on_complete(&mut ctx, m).await,
            Message::ChunkRequest(m) => self.on_chunk_request(&ctx, m).await,
            Message::FileAck(ack) => self.on_ack(&mut ctx, ack).await,
            Message::FileError(err) => {
                warn!(file = %file_id, "Relay error: {}", err.message);
            }
            other => debug!(file = %file_id, "Ignoring {}", other.kind()),
        }
    }

    fn lock_event(&self, owner: Option<&LockRecord>) -> Event {
        match owner {
            None => Event::LockReleased,
            Some(lock) if lock.owner_device_id == self.device_id => Event::LockGranted {
                auto: lock.auto_lock,
            },
            Some(lock) => Event::LockTaken {
                holder: lock.owner_device_id,
            },
        }
    }

    async fn on_registered(&self, ctx: &mut FileContext, m: FileRegistered) {
        ctx.members = m.members;
        if let Err(e) = ctx.history.adopt(&m.history) {
            warn!(file = %ctx.file_id, "Relay history not adopted: {}", e);
        }

        // After a restart, re-attach the head whose content is on disk.
        if let Some(head) = ctx.restored_head.take() {
            if let Some(record) = ctx.history.get(head).cloned() {
                if ctx.machine.head().is_none() && ctx.history.advance_head(head).is_ok() {
                    let policy = ctx.machine.policy().clone();
                    ctx.machine = FileSync::with_head(ctx.file_id, record, policy);
                }
            } else {
                warn!(file = %ctx.file_id, head = %head, "Restored head no longer in relay history");
            }
        }

        match &m.lock {
            Some(lock) if lock.owner_device_id != self.device_id => {
                ctx.lock = m.lock.clone();
                self.dispatch(
                    ctx,
                    Event::LockTaken {
                        holder: lock.owner_device_id,
                    },
                )
                .await;
            }
            // The release was announced while this device was away.
            None if matches!(ctx.machine.state(), SyncState::LockBlocked { .. }) => {
                ctx.lock = None;
                self.dispatch(ctx, Event::LockReleased).await;
            }
            _ => {}
        }

        if let Some(version) = m.version {
            self.announce(ctx, version).await;
        }

        // Edits made while offline.
        match self.capture(ctx).await {
            Ok(Some(version)) => {
                info!(file = %ctx.file_id, "Recording offline edit");
                self.dispatch(ctx, Event::LocalChange { version }).await;
            }
            Ok(None) => {}
            Err(e) => warn!(file = %ctx.file_id, "Could not read local copy: {}", e),
        }
        self.report(ctx).await;
    }

    async fn on_chunk(&self, ctx: &mut FileContext, chunk: FileChunk) {
        if self.snapshots.contains(ctx.file_id, chunk.version).await {
            return;
        }
        let now = unix_timestamp();
        let known = ctx.history.get(chunk.version).cloned();
        // The sender is only certain once the version record is known.
        let from = known
            .as_ref()
            .map_or(self.device_id, |r| r.origin_device_id);
        let fresh = !ctx
            .inbound
            .as_ref()
            .is_some_and(|i| i.version() == chunk.version);
        if let Some(old) = open_inbound(
            &mut ctx.inbound,
            InboundTransfer::from_chunk(&chunk, from, self.device_id, now),
        ) {
            debug!(file = %ctx.file_id, version = %old.version(), "Discarding partial transfer");
        }
        let Some(inbound) = ctx.inbound.as_mut() else {
            return;
        };
        if fresh {
            if let Some(record) = &known {
                inbound.set_expected(record);
            }
        }

        // Unknown senders are left for the relay to pick.
        let holder = Some(inbound.from()).filter(|d| *d != self.device_id);

        match inbound.receive(&chunk, now) {
            Ok(ChunkOutcome::Complete) => self.on_inbound_complete(ctx).await,
            Ok(ChunkOutcome::Rejected { seq }) => {
                warn!(file = %ctx.file_id, version = %chunk.version, seq, "Chunk failed verification");
                let request = Message::ChunkRequest(ChunkRequest {
                    file_id: ctx.file_id,
                    version: chunk.version,
                    seqs: vec![seq],
                    requester: self.device_id,
                    holder,
                });
                if let Err(e) = self.send(request).await {
                    debug!(file = %ctx.file_id, seq, "Chunk re-request not sent: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => debug!(file = %ctx.file_id, "Chunk dropped: {}", e),
        }
    }

    /// Every chunk of the inbound version is held.
    async fn on_inbound_complete(&self, ctx: &mut FileContext) {
        let Some(version) = ctx.inbound.as_ref().map(|i| i.version()) else {
            return;
        };
        if ctx.pulling().is_some_and(|r| r.version_id == version) {
            if let Some(event) = self.finish_pull(ctx).await {
                self.dispatch(ctx, event).await;
            }
            return;
        }
        let candidate = ctx
            .conflict
            .as_ref()
            .filter(|c| c.remote.version_id == version)
            .map(|c| c.remote.clone());
        if let Some(remote) = candidate {
            if self.ensure_content(ctx, &remote).await {
                info!(file = %ctx.file_id, version = %version, "Conflict candidate received");
            }
        }
        // Otherwise wait for file/complete to name the version.
    }

    async fn on_complete(&self, ctx: &mut FileContext, m: FileComplete) {
        let version = m.version;
        if let Some(inbound) = ctx.inbound.as_mut() {
            if inbound.version() == version.version_id {
                let dropped = inbound.set_expected(&version);
                if !dropped.is_empty() {
                    warn!(file = %ctx.file_id, ?dropped, "Dropped chunks that disagree with the version");
                }
            }
        }
        if !ctx.is_stale(&version) {
            self.announce(ctx, version).await;
        }
        if ctx.inbound.as_ref().is_some_and(|i| i.is_complete()) {
            self.on_inbound_complete(ctx).await;
        }
    }

    /// Feed an announced version to the machine.
    async fn announce(&self, ctx: &mut FileContext, version: VersionRecord) {
        if ctx.is_stale(&version) {
            return;
        }
        if let Err(e) = ctx.remember(&version) {
            warn!(file = %ctx.file_id, version = %version.version_id, "Announced version not in window: {}", e);
        }
        let descends_from_head = ctx.descends_from_head(&version);
        let announcer_holds_lock = ctx.lock_held_by(version.origin_device_id);
        debug!(
            file = %ctx.file_id,
            version = %version.version_id,
            descends_from_head,
            announcer_holds_lock,
            "Remote version"
        );
        self.dispatch(
            ctx,
            Event::RemoteVersion {
                version,
                descends_from_head,
                announcer_holds_lock,
            },
        )
        .await;
    }

    async fn on_chunk_request(&self, ctx: &FileContext, m: ChunkRequest) {
        let record = ctx.history.get(m.version).cloned();
        let content = self.snapshots.get(ctx.file_id, m.version).await;
        let (record, content) = match (record, content) {
            (Some(record), Ok(content)) => (record, content),
            _ => {
                let error = Message::FileError(FileError {
                    file_id: Some(ctx.file_id),
                    message: format!("version {} not held by {}", m.version, self.device_id),
                });
                if let Err(e) = self.send(error).await {
                    debug!(file = %ctx.file_id, "Error reply not sent: {}", e);
                }
                return;
            }
        };

        let outbound = OutboundTransfer::new(record.clone(), self.device_id);
        let frames = match outbound.frames(&content, Some(&m.seqs), record.timestamp, Some(m.requester)) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(file = %ctx.file_id, "Cannot serve chunks: {}", e);
                return;
            }
        };
        debug!(
            file = %ctx.file_id,
            version = %m.version,
            requester = %m.requester,
            chunks = frames.len(),
            "Serving chunk request"
        );
        for chunk in frames {
            if let Err(e) = self.send(Message::FileChunk(chunk)).await {
                warn!(file = %ctx.file_id, "Chunk resend failed: {}", e);
                return;
            }
        }
        let complete = Message::FileComplete(FileComplete {
            file_id: ctx.file_id,
            mtime: record.timestamp,
            version: record,
            to: Some(m.requester),
        });
        if let Err(e) = self.send(complete).await {
            warn!(file = %ctx.file_id, "Completion resend failed: {}", e);
        }
    }

    async fn on_ack(&self, ctx: &mut FileContext, ack: FileAck) {
        let event = if ack.accepted {
            info!(file = %ctx.file_id, version = %ack.version, "Version accepted");
            ctx.outbound = None;
            Event::PushAcknowledged {
                version: ack.version,
            }
        } else {
            info!(
                file = %ctx.file_id,
                version = %ack.version,
                reason = ?ack.reason,
                "Version rejected"
            );
            Event::PushRejected {
                version: ack.version,
                locked_by: ack.locked_by,
                remote: ack.head.and_then(|h| ctx.history.get(h).cloned()),
            }
        };
        self.dispatch(ctx, event).await;
    }
}
