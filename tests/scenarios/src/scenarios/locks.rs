//! Lock exclusivity between devices.

#[cfg(test)]
mod tests {
    use crate::assertions::assert_single_head;
    use crate::harness::Network;
    use crate::scenarios::{A, B};
    use sync_core::CoordinatorConfig;
    use sync_types::{FileSyncState, LockMode, Message};

    #[tokio::test]
    async fn second_lock_request_is_denied() {
        let mut net = Network::online(2).await.unwrap();
        let file_id = net.publish(A, "plan.dwg", b"plan v1").await.unwrap();
        net.join(B, file_id, "plan.dwg").await.unwrap();

        net.device(A).engine.lock_file(file_id).await.unwrap();
        net.pump().await.unwrap();
        net.device(B).engine.lock_file(file_id).await.unwrap();
        net.pump().await.unwrap();

        assert_eq!(net.relay().lock_count(), 1);
        let a = net.device(A).id();
        for device in [A, B] {
            let lock = net.status(device, file_id).await.unwrap().lock;
            assert_eq!(lock.map(|l| l.owner_device_id), Some(a));
        }
    }

    #[tokio::test]
    async fn blocked_push_waits_for_release_then_lands() {
        let mut net = Network::online(2).await.unwrap();
        let file_id = net.publish(A, "plan.dwg", b"plan v1").await.unwrap();
        net.join(B, file_id, "plan.dwg").await.unwrap();
        let v1 = net.status(A, file_id).await.unwrap().head;

        net.device(A).engine.lock_file(file_id).await.unwrap();
        net.pump().await.unwrap();

        let vb = net
            .edit(B, file_id, b"plan revised on B")
            .await
            .unwrap()
            .unwrap();
        net.pump().await.unwrap();
        assert_eq!(net.status(B, file_id).await.unwrap().state, FileSyncState::LockBlocked);
        // Nothing reached A, and B's edit is safe locally.
        assert_eq!(net.status(A, file_id).await.unwrap().head, v1);
        assert_eq!(net.read(A, file_id).await.unwrap(), b"plan v1");
        assert!(net.device(B).engine.snapshots().contains(file_id, vb).await);
        assert!(!net
            .sent_by(B)
            .iter()
            .any(|m| matches!(m, Message::FileComplete(c) if c.version.version_id == vb)));

        net.device(A)
            .engine
            .unlock_file(file_id, LockMode::Exclusive)
            .await
            .unwrap();
        net.pump().await.unwrap();

        let statuses = vec![
            net.status(A, file_id).await.unwrap(),
            net.status(B, file_id).await.unwrap(),
        ];
        assert_single_head(&statuses).assert();
        assert_eq!(statuses[0].head, Some(vb));
        assert_eq!(net.read(A, file_id).await.unwrap(), b"plan revised on B");
        // B's auto-lock went away with the push.
        assert_eq!(net.relay().lock_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_releases_the_lock_for_everyone() {
        let mut net = Network::online(2).await.unwrap();
        let file_id = net.publish(A, "plan.dwg", b"plan v1").await.unwrap();
        net.join(B, file_id, "plan.dwg").await.unwrap();
        net.device(A).engine.lock_file(file_id).await.unwrap();
        net.pump().await.unwrap();

        net.disconnect(A).await.unwrap();
        assert_eq!(net.relay().lock_count(), 0);
        assert_eq!(net.status(B, file_id).await.unwrap().lock, None);

        net.device(B).engine.lock_file(file_id).await.unwrap();
        net.pump().await.unwrap();
        let lock = net.status(B, file_id).await.unwrap().lock;
        assert_eq!(lock.map(|l| l.owner_device_id), Some(net.device(B).id()));
    }

    #[tokio::test]
    async fn override_breaks_a_held_lock() {
        let mut net = Network::online(2).await.unwrap();
        let file_id = net.publish(A, "plan.dwg", b"plan v1").await.unwrap();
        net.join(B, file_id, "plan.dwg").await.unwrap();
        net.device(A).engine.lock_file(file_id).await.unwrap();
        net.pump().await.unwrap();

        net.device(B)
            .engine
            .unlock_file(file_id, LockMode::Override)
            .await
            .unwrap();
        net.pump().await.unwrap();
        assert_eq!(net.relay().lock_count(), 0);
        assert_eq!(net.status(A, file_id).await.unwrap().lock, None);
    }

    #[tokio::test]
    async fn lapsed_lock_unblocks_a_waiting_push() {
        const C: usize = 2;
        let config = CoordinatorConfig {
            lock_ttl_secs: Some(60),
            ..CoordinatorConfig::default()
        };
        let mut net = Network::with_config(3, config).await.unwrap();
        for device in [A, B] {
            net.connect(device).await.unwrap();
        }
        let file_id = net.publish(A, "plan.dwg", b"plan v1").await.unwrap();
        net.join(B, file_id, "plan.dwg").await.unwrap();
        net.device(A).engine.lock_file(file_id).await.unwrap();
        net.pump().await.unwrap();

        let vb = net
            .edit(B, file_id, b"plan revised on B")
            .await
            .unwrap()
            .unwrap();
        net.pump().await.unwrap();
        assert_eq!(net.status(B, file_id).await.unwrap().state, FileSyncState::LockBlocked);

        // A never releases. The lock runs out and the next device to show up
        // is what notices.
        net.advance_clock(120);
        net.connect(C).await.unwrap();
        net.join(C, file_id, "plan.dwg").await.unwrap();

        let mut statuses = Vec::new();
        for device in [A, B, C] {
            statuses.push(net.status(device, file_id).await.unwrap());
        }
        assert_single_head(&statuses).assert();
        assert_eq!(statuses[0].head, Some(vb));
        assert_eq!(net.read(C, file_id).await.unwrap(), b"plan revised on B");
        assert_eq!(net.relay().lock_count(), 0);
        let now = net.now();
        assert!(net.relay().sweep_expired_locks(now).is_empty());
    }

    #[tokio::test]
    async fn manual_locks_expire_after_their_ttl() {
        let config = CoordinatorConfig {
            lock_ttl_secs: Some(0),
            ..CoordinatorConfig::default()
        };
        let mut net = Network::with_config(2, config).await.unwrap();
        for device in [A, B] {
            net.connect(device).await.unwrap();
        }
        let file_id = net.publish(A, "plan.dwg", b"plan v1").await.unwrap();
        net.join(B, file_id, "plan.dwg").await.unwrap();
        net.device(A).engine.lock_file(file_id).await.unwrap();
        net.pump().await.unwrap();

        let later = sync_types::unix_timestamp() + 5;
        let notices = net.relay().sweep_expired_locks(later);
        assert_eq!(notices.len(), 2);
        assert_eq!(net.relay().lock_count(), 0);
    }
}
