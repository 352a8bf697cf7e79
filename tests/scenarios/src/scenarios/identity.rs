//! File identity across renames and moves.

#[cfg(test)]
mod tests {
    use crate::harness::Network;
    use crate::scenarios::{A, B};
    use sync_client::LocalRegistry;
    use sync_types::FileSyncState;

    #[tokio::test]
    async fn renames_keep_identity_and_head() {
        let mut net = Network::online(2).await.unwrap();
        let file_id = net.publish(A, "cover.psd", b"cover draft").await.unwrap();
        net.join(B, file_id, "cover.psd").await.unwrap();
        let before = net.status(A, file_id).await.unwrap();

        let moved = net
            .rename(A, file_id, "archive/cover-final.psd")
            .await
            .unwrap();
        let after = net.status(A, file_id).await.unwrap();
        assert_eq!(after.file_id, file_id);
        assert_eq!(after.head, before.head);
        assert_eq!(after.state, FileSyncState::Ready);
        assert_eq!(after.path, moved);
        let bound = net.device(A).engine.registry().find_by_path(&moved).await;
        assert_eq!(bound.unwrap().map(|e| e.file_id), Some(file_id));

        // A rename is local; nothing goes over the wire.
        assert_eq!(net.pump().await.unwrap(), 0);
        assert_eq!(net.status(B, file_id).await.unwrap().head, before.head);

        let second_move = net.rename(A, file_id, "cover.psd").await.unwrap();
        assert_eq!(net.status(A, file_id).await.unwrap().path, second_move);

        // Edits at the new path still travel under the same identity.
        let v2 = net
            .edit(A, file_id, b"cover, final colours")
            .await
            .unwrap()
            .unwrap();
        net.pump().await.unwrap();
        let b = net.status(B, file_id).await.unwrap();
        assert_eq!(b.head, Some(v2));
        assert_eq!(b.path, net.device(B).path("cover.psd"));
        assert_eq!(net.read(B, file_id).await.unwrap(), b"cover, final colours");
    }

    #[tokio::test]
    async fn rename_on_one_device_does_not_move_the_other() {
        let mut net = Network::online(2).await.unwrap();
        let file_id = net.publish(A, "notes.pdf", b"notes").await.unwrap();
        net.join(B, file_id, "shared/notes.pdf").await.unwrap();

        net.rename(B, file_id, "mine.pdf").await.unwrap();
        net.pump().await.unwrap();

        assert_eq!(
            net.status(A, file_id).await.unwrap().path,
            net.device(A).path("notes.pdf")
        );
        assert_eq!(net.read(B, file_id).await.unwrap(), b"notes");
    }
}
