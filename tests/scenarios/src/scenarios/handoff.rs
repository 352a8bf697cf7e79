//! A device that was away while another pushed under a lock.

#[cfg(test)]
mod tests {
    use crate::assertions::{assert_transitions, drain_state_changes};
    use crate::harness::Network;
    use crate::scenarios::{A, B};
    use sync_types::{ContentHash, FileSyncState};

    #[tokio::test]
    async fn reconnecting_device_pulls_version_pushed_under_lock() {
        let mut net = Network::online(2).await.unwrap();
        let file_id = net
            .publish(A, "model.blend", b"first cut of the model")
            .await
            .unwrap();
        net.join(B, file_id, "model.blend").await.unwrap();
        let v1 = net.status(B, file_id).await.unwrap().head.unwrap();

        net.disconnect(B).await.unwrap();
        net.device(A).engine.lock_file(file_id).await.unwrap();
        net.pump().await.unwrap();
        let owner = net.status(A, file_id).await.unwrap().lock.map(|l| l.owner_device_id);
        assert_eq!(owner, Some(net.device(A).id()));

        let v2 = net
            .edit(A, file_id, b"second cut, reworked")
            .await
            .unwrap()
            .unwrap();
        net.pump().await.unwrap();
        let status = net.status(A, file_id).await.unwrap();
        assert_eq!(status.state, FileSyncState::Ready);
        assert_eq!(status.head, Some(v2));
        let history = net.device(A).engine.history(file_id).await;
        let record = history.iter().find(|r| r.version_id == v2).unwrap();
        assert_eq!(record.parent_version_id, Some(v1));
        let h2 = record.content_hash;

        let mut events = net.device(B).engine.events();
        net.connect(B).await.unwrap();
        net.pump().await.unwrap();

        let status = net.status(B, file_id).await.unwrap();
        assert_eq!(status.state, FileSyncState::Ready);
        assert_eq!(status.head, Some(v2));
        assert_eq!(ContentHash::of(&net.read(B, file_id).await.unwrap()), h2);
        assert_transitions(
            &drain_state_changes(&mut events, file_id),
            &[
                FileSyncState::AvailableRemote,
                FileSyncState::Pulling,
                FileSyncState::Ready,
            ],
        )
        .assert();

        // A still holds its manual lock, and B knows it.
        let owner = status.lock.map(|l| l.owner_device_id);
        assert_eq!(owner, Some(net.device(A).id()));
        assert_eq!(net.relay().lock_count(), 1);
    }

    #[tokio::test]
    async fn late_joiner_receives_current_head() {
        let mut net = Network::online(3).await.unwrap();
        let file_id = net.publish(A, "scene.usd", b"scene v1").await.unwrap();
        let v2 = net.edit(A, file_id, b"scene v2").await.unwrap().unwrap();
        net.pump().await.unwrap();

        net.join(2, file_id, "scene.usd").await.unwrap();
        let status = net.status(2, file_id).await.unwrap();
        assert_eq!(status.state, FileSyncState::Ready);
        assert_eq!(status.head, Some(v2));
        assert_eq!(net.read(2, file_id).await.unwrap(), b"scene v2");
        assert_eq!(status.members.len(), 2);
    }
}
