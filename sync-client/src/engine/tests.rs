use super::*;
use crate::registry::MemoryRegistry;
use crate::transport::MockTransport;
use sync_content::MemoryStore;
use sync_core::{OutboundTransfer, RetryPolicy};
use sync_types::{
    ChunkRequest, DeviceRegistered, FileAck, FileComplete, FileRegistered, Hydration, LockDenied,
    LockId, LockState,
};
use tempfile::TempDir;

type TestEngine = SyncEngine<MockTransport, MemoryRegistry, MemoryStore>;

struct Rig {
    engine: TestEngine,
    transport: MockTransport,
    dir: TempDir,
}

impl Rig {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let config = ClientConfig::default()
            .with_data_dir(dir.path().join(".atrius"))
            .with_chunk_size(4)
            .with_retry(RetryPolicy {
                max_retries: 2,
                jitter_ms: 0,
                ..RetryPolicy::default()
            });
        let engine = SyncEngine::new(
            config,
            DeviceId::random(),
            transport.clone(),
            MemoryRegistry::new(),
            SnapshotStore::new(MemoryStore::new()),
        );
        transport.queue_message(&Message::DeviceRegistered(DeviceRegistered {
            device_id: engine.device_id(),
        }));
        engine.connect().await.unwrap();
        transport.drain_sent();
        Self {
            engine,
            transport,
            dir,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn lock_record(&self, file_id: FileId, owner: DeviceId) -> LockRecord {
        LockRecord {
            lock_id: LockId::new(),
            file_id,
            owner_device_id: owner,
            owner_user_id: "someone".into(),
            acquired_at: unix_timestamp(),
            auto_lock: true,
            expires_at: None,
        }
    }

    async fn grant_lock(&self, file_id: FileId) {
        let owner = Some(self.lock_record(file_id, self.engine.device_id()));
        self.engine
            .handle_message(Message::LockState(LockState { file_id, owner }))
            .await;
    }

    async fn ack(&self, file_id: FileId, version: VersionId) {
        self.engine
            .handle_message(Message::FileAck(FileAck {
                file_id,
                version,
                accepted: true,
                head: Some(version),
                locked_by: None,
                reason: None,
            }))
            .await;
    }

    /// Add a file and push its first version through lock and ack.
    async fn published(&self, name: &str, content: &[u8]) -> (FileId, VersionRecord) {
        let path = self.path(name);
        std::fs::write(&path, content).unwrap();
        let file_id = self.engine.add_file(&path).await.unwrap();
        self.grant_lock(file_id).await;
        let head = self.pushed_version(file_id).await;
        self.ack(file_id, head.version_id).await;
        self.transport.drain_sent();
        (file_id, head)
    }

    async fn pushed_version(&self, file_id: FileId) -> VersionRecord {
        self.transport
            .sent()
            .into_iter()
            .rev()
            .find_map(|m| match m {
                Message::FileComplete(c) if c.file_id == file_id => Some(c.version),
                _ => None,
            })
            .unwrap()
    }

    /// Stream a version from another device: chunks first, then the record.
    async fn deliver(&self, version: &VersionRecord, content: &[u8]) {
        let outbound = OutboundTransfer::new(version.clone(), version.origin_device_id);
        for chunk in outbound
            .frames(content, None, version.timestamp, None)
            .unwrap()
        {
            self.engine.handle_message(Message::FileChunk(chunk)).await;
        }
        self.announce(version).await;
    }

    async fn announce(&self, version: &VersionRecord) {
        self.engine
            .handle_message(Message::FileComplete(FileComplete {
                file_id: version.file_id,
                version: version.clone(),
                mtime: version.timestamp,
                to: None,
            }))
            .await;
    }

    async fn state(&self, file_id: FileId) -> FileSyncState {
        self.engine.status(file_id).await.unwrap().state
    }
}

fn kinds(messages: &[Message]) -> Vec<&'static str> {
    messages.iter().map(|m| m.kind()).collect()
}

#[tokio::test]
async fn adding_a_file_pushes_it_under_an_auto_lock() {
    let rig = Rig::new().await;
    let path = rig.path("report.docx");
    std::fs::write(&path, b"quarterly numbers").unwrap();

    let file_id = rig.engine.add_file(&path).await.unwrap();
    let sent = rig.transport.drain_sent();
    assert!(matches!(sent[0], Message::FileRegister(ref r) if r.file_id == file_id));
    assert!(sent
        .iter()
        .any(|m| matches!(m, Message::LockAcquire(l) if l.auto_lock)));
    assert!(!sent.iter().any(|m| matches!(m, Message::FileChunk(_))));
    assert_eq!(rig.state(file_id).await, FileSyncState::Pushing);

    rig.grant_lock(file_id).await;
    let sent = rig.transport.drain_sent();
    let chunks = sent
        .iter()
        .filter(|m| matches!(m, Message::FileChunk(_)))
        .count();
    assert_eq!(chunks, 5);
    let head = rig.pushed_version(file_id).await;
    assert_eq!(head.parent_version_id, None);
    assert_eq!(head.origin_device_id, rig.engine.device_id());

    rig.ack(file_id, head.version_id).await;
    let status = rig.engine.status(file_id).await.unwrap();
    assert_eq!(status.state, FileSyncState::Ready);
    assert_eq!(status.head, Some(head.version_id));
    assert!(rig
        .transport
        .drain_sent()
        .iter()
        .any(|m| matches!(m, Message::LockRelease(_))));

    let entry = rig.engine.registry().get(file_id).await.unwrap().unwrap();
    assert_eq!(entry.head_version_id, Some(head.version_id));
    assert_eq!(entry.hydration, Hydration::FullyPresent);
}

#[tokio::test]
async fn unchanged_content_is_not_a_new_version() {
    let rig = Rig::new().await;
    let (file_id, _) = rig.published("a.txt", b"same bytes").await;
    assert_eq!(rig.engine.on_local_change(file_id).await.unwrap(), None);
    assert!(rig.transport.drain_sent().is_empty());
}

#[tokio::test]
async fn remote_versions_are_pulled_to_disk() {
    let rig = Rig::new().await;
    let file_id = FileId::new();
    let path = rig.path("shared.psd");
    rig.engine.track_remote(file_id, &path).await.unwrap();
    rig.transport.drain_sent();

    let other = DeviceId::random();
    let content = b"layered artwork".to_vec();
    let v1 = describe(file_id, None, other, 10, &content, 4);
    rig.deliver(&v1, &content).await;

    assert_eq!(std::fs::read(&path).unwrap(), content);
    let status = rig.engine.status(file_id).await.unwrap();
    assert_eq!(status.state, FileSyncState::Ready);
    assert_eq!(status.head, Some(v1.version_id));
    assert!(rig.engine.snapshots().contains(file_id, v1.version_id).await);
    assert!(rig.engine.transfers(file_id).await.is_empty());
}

#[tokio::test]
async fn announced_version_requests_only_missing_chunks() {
    let rig = Rig::new().await;
    let file_id = FileId::new();
    let path = rig.path("clip.mov");
    rig.engine.track_remote(file_id, &path).await.unwrap();
    rig.transport.drain_sent();

    let other = DeviceId::random();
    let content = b"0123456789ab".to_vec();
    let v1 = describe(file_id, None, other, 10, &content, 4);
    let frames = OutboundTransfer::new(v1.clone(), other)
        .frames(&content, None, 10, None)
        .unwrap();
    rig.engine
        .handle_message(Message::FileChunk(frames[1].clone()))
        .await;
    rig.announce(&v1).await;

    let requests: Vec<ChunkRequest> = rig
        .transport
        .drain_sent()
        .into_iter()
        .filter_map(|m| match m {
            Message::ChunkRequest(r) => Some(r),
            _ => None,
        })
        .collect();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].seqs, vec![0, 2]);
    assert_eq!(rig.state(file_id).await, FileSyncState::Pulling);

    for seq in [0, 2] {
        rig.engine
            .handle_message(Message::FileChunk(frames[seq].clone()))
            .await;
    }
    assert_eq!(std::fs::read(&path).unwrap(), content);
    assert_eq!(rig.state(file_id).await, FileSyncState::Ready);
}

#[tokio::test]
async fn corrupted_chunk_is_requested_again_on_its_own() {
    let rig = Rig::new().await;
    let file_id = FileId::new();
    let path = rig.path("texture.exr");
    rig.engine.track_remote(file_id, &path).await.unwrap();

    let other = DeviceId::random();
    let content = b"0123456789ab".to_vec();
    let v1 = describe(file_id, None, other, 10, &content, 4);
    rig.announce(&v1).await;
    rig.transport.drain_sent();

    let frames = OutboundTransfer::new(v1.clone(), other)
        .frames(&content, None, 10, None)
        .unwrap();
    let mut corrupted = frames[1].clone();
    corrupted.chunk_bytes = b"XXXX".to_vec();
    for chunk in [frames[0].clone(), corrupted, frames[2].clone()] {
        rig.engine.handle_message(Message::FileChunk(chunk)).await;
    }

    let requests: Vec<ChunkRequest> = rig
        .transport
        .drain_sent()
        .into_iter()
        .filter_map(|m| match m {
            Message::ChunkRequest(r) => Some(r),
            _ => None,
        })
        .collect();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].seqs, vec![1]);
    assert_eq!(requests[0].holder, Some(other));
    assert_eq!(rig.state(file_id).await, FileSyncState::Pulling);

    rig.engine
        .handle_message(Message::FileChunk(frames[1].clone()))
        .await;
    assert_eq!(std::fs::read(&path).unwrap(), content);
    assert_eq!(rig.state(file_id).await, FileSyncState::Ready);
}

#[tokio::test]
async fn divergent_edit_raises_a_conflict() {
    let rig = Rig::new().await;
    let (file_id, v1) = rig.published("plan.xlsx", b"v1 content").await;
    let mut events = rig.engine.events();

    std::fs::write(rig.path("plan.xlsx"), b"local edit").unwrap();
    let local = rig.engine.on_local_change(file_id).await.unwrap().unwrap();

    let other = DeviceId::random();
    let remote_content = b"remote edit".to_vec();
    let remote = describe(file_id, Some(v1.version_id), other, 20, &remote_content, 4);
    rig.deliver(&remote, &remote_content).await;

    let status = rig.engine.status(file_id).await.unwrap();
    assert_eq!(status.state, FileSyncState::Conflict);
    assert_eq!(status.conflict, Some((local, remote.version_id)));
    // Neither side was overwritten.
    assert_eq!(std::fs::read(rig.path("plan.xlsx")).unwrap(), b"local edit");
    assert!(rig.engine.snapshots().contains(file_id, remote.version_id).await);

    let mut raised = false;
    while let Ok(event) = events.try_recv() {
        raised |= matches!(event, SyncEvent::ConflictRaised { .. });
    }
    assert!(raised);
}

#[tokio::test]
async fn take_remote_writes_remote_content_and_keeps_local() {
    let rig = Rig::new().await;
    let (file_id, v1) = rig.published("plan.xlsx", b"v1 content").await;
    std::fs::write(rig.path("plan.xlsx"), b"local edit").unwrap();
    let local = rig.engine.on_local_change(file_id).await.unwrap().unwrap();

    let remote_content = b"remote edit".to_vec();
    let remote = describe(file_id, Some(v1.version_id), DeviceId::random(), 20, &remote_content, 4);
    rig.deliver(&remote, &remote_content).await;

    let resolution = rig
        .engine
        .resolve_conflict(file_id, ResolutionChoice::TakeRemote)
        .await
        .unwrap();
    assert!(matches!(resolution, Resolution::TakeRemote { .. }));
    assert_eq!(std::fs::read(rig.path("plan.xlsx")).unwrap(), remote_content);
    let status = rig.engine.status(file_id).await.unwrap();
    assert_eq!(status.state, FileSyncState::Ready);
    assert_eq!(status.head, Some(remote.version_id));
    // The overruled local edit remains restorable.
    assert_eq!(
        rig.engine.snapshots().get(file_id, local).await.unwrap(),
        b"local edit"
    );
}

#[tokio::test]
async fn lock_holder_overrides_pending_edit_but_keeps_it_restorable() {
    let rig = Rig::new().await;
    let (file_id, v1) = rig.published("plan.xlsx", b"v1 content").await;
    let holder = DeviceId::random();
    let owner = Some(rig.lock_record(file_id, holder));
    rig.engine
        .handle_message(Message::LockState(LockState { file_id, owner }))
        .await;

    std::fs::write(rig.path("plan.xlsx"), b"local edit").unwrap();
    let local = rig.engine.on_local_change(file_id).await.unwrap().unwrap();

    let remote_content = b"holder edit".to_vec();
    let remote = describe(file_id, Some(v1.version_id), holder, 20, &remote_content, 4);
    rig.deliver(&remote, &remote_content).await;

    let status = rig.engine.status(file_id).await.unwrap();
    assert_eq!(status.state, FileSyncState::Ready);
    assert_eq!(status.head, Some(remote.version_id));
    assert_eq!(std::fs::read(rig.path("plan.xlsx")).unwrap(), remote_content);
    assert_eq!(
        rig.engine.snapshots().get(file_id, local).await.unwrap(),
        b"local edit"
    );
}

#[tokio::test]
async fn keep_both_then_designate_local_publishes_on_top_of_remote() {
    let rig = Rig::new().await;
    let (file_id, v1) = rig.published("plan.xlsx", b"v1 content").await;
    std::fs::write(rig.path("plan.xlsx"), b"local edit").unwrap();
    let local = rig.engine.on_local_change(file_id).await.unwrap().unwrap();

    let remote_content = b"remote edit".to_vec();
    let remote = describe(file_id, Some(v1.version_id), DeviceId::random(), 20, &remote_content, 4);
    rig.deliver(&remote, &remote_content).await;

    let Resolution::KeepBoth {
        local: kept_local,
        remote: kept_remote,
        parent,
    } = rig
        .engine
        .resolve_conflict(file_id, ResolutionChoice::KeepBoth)
        .await
        .unwrap()
    else {
        panic!("expected keep-both");
    };
    assert_eq!(parent, Some(v1.version_id));
    assert_eq!(kept_local.version_id, local);
    assert_eq!(kept_remote.version_id, remote.version_id);
    assert_eq!(rig.state(file_id).await, FileSyncState::Conflict);
    rig.transport.drain_sent();

    let head = rig
        .engine
        .designate_head(file_id, kept_local.version_id)
        .await
        .unwrap();
    let history = rig.engine.history(file_id).await;
    let published = history.iter().find(|r| r.version_id == head).unwrap();
    assert_eq!(published.parent_version_id, Some(remote.version_id));
    assert_eq!(published.content_hash, kept_local.content_hash);
    assert_eq!(rig.state(file_id).await, FileSyncState::Pushing);
    assert!(rig
        .transport
        .drain_sent()
        .iter()
        .any(|m| matches!(m, Message::LockAcquire(_))));
}

#[tokio::test]
async fn designating_a_stranger_is_refused() {
    let rig = Rig::new().await;
    let (file_id, v1) = rig.published("plan.xlsx", b"v1 content").await;
    std::fs::write(rig.path("plan.xlsx"), b"local edit").unwrap();
    rig.engine.on_local_change(file_id).await.unwrap();
    let remote_content = b"remote edit".to_vec();
    let remote = describe(file_id, Some(v1.version_id), DeviceId::random(), 20, &remote_content, 4);
    rig.deliver(&remote, &remote_content).await;
    rig.engine
        .resolve_conflict(file_id, ResolutionChoice::KeepBoth)
        .await
        .unwrap();

    let err = rig
        .engine
        .designate_head(file_id, VersionId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Conflict(ConflictError::NotACandidate(_))));
}

#[tokio::test]
async fn resolving_without_a_conflict_fails() {
    let rig = Rig::new().await;
    let (file_id, _) = rig.published("a.txt", b"calm").await;
    let err = rig
        .engine
        .resolve_conflict(file_id, ResolutionChoice::KeepLocal)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotInConflict(id) if id == file_id));
}

#[tokio::test]
async fn rollback_restores_content_as_a_new_version() {
    let rig = Rig::new().await;
    let (file_id, v1) = rig.published("doc.txt", b"first draft").await;

    std::fs::write(rig.path("doc.txt"), b"second draft").unwrap();
    rig.engine.on_local_change(file_id).await.unwrap();
    rig.grant_lock(file_id).await;
    let v2 = rig.pushed_version(file_id).await;
    rig.ack(file_id, v2.version_id).await;

    let v3 = rig.engine.rollback(file_id, v1.version_id).await.unwrap();
    assert_ne!(v3, v1.version_id);
    assert_eq!(std::fs::read(rig.path("doc.txt")).unwrap(), b"first draft");
    let history = rig.engine.history(file_id).await;
    let record = history.iter().find(|r| r.version_id == v3).unwrap();
    assert_eq!(record.parent_version_id, Some(v2.version_id));
    assert_eq!(record.content_hash, v1.content_hash);
    assert!(history.iter().any(|r| r.version_id == v2.version_id));
}

#[tokio::test]
async fn rollback_to_unknown_version_fails() {
    let rig = Rig::new().await;
    let (file_id, _) = rig.published("doc.txt", b"draft").await;
    assert!(rig.engine.rollback(file_id, VersionId::new()).await.is_err());
}

#[tokio::test]
async fn renames_keep_the_file_identity() {
    let rig = Rig::new().await;
    let (file_id, _) = rig.published("old name.txt", b"content").await;
    let from = rig.path("old name.txt");
    let to = rig.path("new name.txt");
    std::fs::rename(&from, &to).unwrap();

    rig.engine
        .on_path_event(FileEvent {
            path: to.clone(),
            kind: FileEventKind::Renamed { from },
        })
        .await
        .unwrap();

    assert_eq!(rig.engine.status(file_id).await.unwrap().path, to);
    let entry = rig.engine.registry().find_by_path(&to).await.unwrap().unwrap();
    assert_eq!(entry.file_id, file_id);
    // No new version for a move.
    assert_eq!(rig.engine.on_local_change(file_id).await.unwrap(), None);
}

#[tokio::test]
async fn lock_held_elsewhere_blocks_the_push() {
    let rig = Rig::new().await;
    let (file_id, _) = rig.published("a.txt", b"one").await;
    let holder = DeviceId::random();

    std::fs::write(rig.path("a.txt"), b"two").unwrap();
    rig.engine.on_local_change(file_id).await.unwrap();
    rig.engine
        .handle_message(Message::LockDenied(LockDenied {
            file_id,
            holder,
            acquired_at: 1,
        }))
        .await;
    assert_eq!(rig.state(file_id).await, FileSyncState::LockBlocked);
    rig.transport.drain_sent();

    rig.engine
        .handle_message(Message::LockState(LockState {
            file_id,
            owner: None,
        }))
        .await;
    assert!(rig
        .transport
        .drain_sent()
        .iter()
        .any(|m| matches!(m, Message::LockAcquire(_))));
    assert_eq!(rig.state(file_id).await, FileSyncState::Pushing);
}

#[tokio::test]
async fn failed_lock_request_errors_and_retries() {
    let rig = Rig::new().await;
    let (file_id, _) = rig.published("a.txt", b"one").await;

    rig.transport.partition("link down");
    std::fs::write(rig.path("a.txt"), b"two").unwrap();
    rig.engine.on_local_change(file_id).await.unwrap();
    let status = rig.engine.status(file_id).await.unwrap();
    assert_eq!(status.state, FileSyncState::Error);
    assert!(status.error.is_some());

    rig.transport.heal();
    rig.engine.retry(file_id).await.unwrap();
    assert_eq!(rig.state(file_id).await, FileSyncState::Pushing);
    assert!(rig
        .transport
        .drain_sent()
        .iter()
        .any(|m| matches!(m, Message::LockAcquire(_))));
}

#[tokio::test]
async fn lock_reply_lost_in_a_reconnect_is_asked_again() {
    let rig = Rig::new().await;
    std::fs::write(rig.path("a.txt"), b"one").unwrap();
    let file_id = rig.engine.add_file(&rig.path("a.txt")).await.unwrap();
    assert!(kinds(&rig.transport.drain_sent()).contains(&"lock/acquire"));

    // The relay's reply dies with the connection.
    rig.engine.disconnect().await.unwrap();
    rig.transport
        .queue_message(&Message::DeviceRegistered(DeviceRegistered {
            device_id: rig.engine.device_id(),
        }));
    rig.engine.connect().await.unwrap();
    let sent = rig.transport.drain_sent();
    assert!(sent
        .iter()
        .any(|m| matches!(m, Message::LockAcquire(r) if r.file_id == file_id)));

    // Still unanswered: the stall check asks once more.
    rig.engine.check_stalled(unix_timestamp() + 120).await;
    assert!(rig
        .transport
        .drain_sent()
        .iter()
        .any(|m| matches!(m, Message::LockAcquire(r) if r.file_id == file_id)));

    rig.grant_lock(file_id).await;
    let head = rig.pushed_version(file_id).await;
    rig.ack(file_id, head.version_id).await;
    assert_eq!(rig.state(file_id).await, FileSyncState::Ready);
}

#[tokio::test]
async fn release_missed_while_away_unblocks_on_reconnect() {
    let rig = Rig::new().await;
    let (file_id, v1) = rig.published("a.txt", b"one").await;
    let holder = DeviceId::random();

    std::fs::write(rig.path("a.txt"), b"two").unwrap();
    rig.engine.on_local_change(file_id).await.unwrap();
    rig.engine
        .handle_message(Message::LockDenied(LockDenied {
            file_id,
            holder,
            acquired_at: 1,
        }))
        .await;
    assert_eq!(rig.state(file_id).await, FileSyncState::LockBlocked);
    rig.transport.drain_sent();

    rig.engine
        .handle_message(Message::FileRegistered(FileRegistered {
            file_id,
            members: vec![rig.engine.device_id(), holder],
            version: Some(v1.clone()),
            history: vec![v1],
            lock: None,
        }))
        .await;
    assert!(rig
        .transport
        .drain_sent()
        .iter()
        .any(|m| matches!(m, Message::LockAcquire(_))));
    assert_eq!(rig.state(file_id).await, FileSyncState::Pushing);
}

#[tokio::test]
async fn stalled_pull_is_retried() {
    let rig = Rig::new().await;
    let file_id = FileId::new();
    rig.engine
        .track_remote(file_id, rig.path("big.bin"))
        .await
        .unwrap();
    let content = b"never arrives".to_vec();
    let v1 = describe(file_id, None, DeviceId::random(), 10, &content, 4);
    rig.announce(&v1).await;
    assert_eq!(rig.state(file_id).await, FileSyncState::Pulling);
    rig.transport.drain_sent();

    rig.engine.check_stalled(unix_timestamp() + 120).await;
    assert_eq!(rig.state(file_id).await, FileSyncState::Pulling);
    let generation = rig.engine.context(file_id).unwrap().lock().await.retry_generation;
    assert_eq!(generation, 1);

    rig.engine.retry_due(file_id, generation).await;
    let sent = rig.transport.drain_sent();
    assert!(sent.iter().any(|m| matches!(m, Message::ChunkRequest(_))));
    let sessions = rig.engine.transfers(file_id).await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].retry_count, 1);
}

#[tokio::test]
async fn chunk_requests_are_served_from_snapshots() {
    let rig = Rig::new().await;
    let (file_id, v1) = rig.published("a.txt", b"0123456789").await;
    let requester = DeviceId::random();

    rig.engine
        .handle_message(Message::ChunkRequest(ChunkRequest {
            file_id,
            version: v1.version_id,
            seqs: vec![1],
            requester,
            holder: Some(rig.engine.device_id()),
        }))
        .await;
    let sent = rig.transport.drain_sent();
    assert_eq!(kinds(&sent), vec!["file/chunk", "file/complete"]);
    assert!(matches!(&sent[0], Message::FileChunk(c) if c.seq == 1 && c.to == Some(requester)));

    rig.engine
        .handle_message(Message::ChunkRequest(ChunkRequest {
            file_id,
            version: VersionId::new(),
            seqs: vec![],
            requester,
            holder: None,
        }))
        .await;
    assert!(matches!(
        rig.transport.drain_sent().as_slice(),
        [Message::FileError(_)]
    ));
}

#[tokio::test]
async fn restart_reattaches_head_and_detects_offline_edits() {
    let rig = Rig::new().await;
    let (file_id, v1) = rig.published("a.txt", b"before").await;
    std::fs::write(rig.path("a.txt"), b"edited offline").unwrap();

    let transport = MockTransport::new();
    let restarted = SyncEngine::new(
        rig.engine.config.clone(),
        rig.engine.device_id(),
        transport.clone(),
        MemoryRegistry::new(),
        SnapshotStore::new(MemoryStore::new()),
    );
    let entry = rig.engine.registry().get(file_id).await.unwrap().unwrap();
    restarted.registry().bind(entry).await.unwrap();
    assert_eq!(restarted.restore().await.unwrap(), 1);

    transport.queue_message(&Message::DeviceRegistered(DeviceRegistered {
        device_id: restarted.device_id(),
    }));
    restarted.connect().await.unwrap();
    restarted
        .handle_message(Message::FileRegistered(FileRegistered {
            file_id,
            members: vec![restarted.device_id()],
            version: Some(v1.clone()),
            history: vec![v1.clone()],
            lock: None,
        }))
        .await;

    let history = restarted.history(file_id).await;
    let edit = history.last().unwrap();
    assert_eq!(edit.parent_version_id, Some(v1.version_id));
    assert_eq!(restarted.status(file_id).await.unwrap().state, FileSyncState::Pushing);
}

#[tokio::test]
async fn messages_for_untracked_files_are_ignored() {
    let rig = Rig::new().await;
    rig.engine
        .handle_message(Message::LockState(LockState {
            file_id: FileId::new(),
            owner: None,
        }))
        .await;
    assert!(rig.transport.drain_sent().is_empty());
}
