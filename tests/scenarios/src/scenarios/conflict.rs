//! Divergent offline edits.

#[cfg(test)]
mod tests {
    use crate::assertions::{assert_siblings, assert_single_head};
    use crate::harness::Network;
    use crate::scenarios::{A, B};
    use sync_core::{Resolution, ResolutionChoice};
    use sync_types::{FileId, FileSyncState, VersionId};

    const EDIT_A: &[u8] = b"deck edited on A";
    const EDIT_B: &[u8] = b"deck edited on B";

    struct Diverged {
        net: Network,
        file_id: FileId,
        v1: VersionId,
        /// Reached the relay first.
        v2a: VersionId,
        v2b: VersionId,
    }

    /// Share a file, edit it on both devices while offline, then bring A
    /// back before B.
    async fn diverged() -> Diverged {
        let mut net = Network::online(2).await.unwrap();
        let file_id = net
            .publish(A, "deck.key", b"shared deck v1")
            .await
            .unwrap();
        net.join(B, file_id, "deck.key").await.unwrap();
        let v1 = net.status(A, file_id).await.unwrap().head.unwrap();

        net.disconnect(A).await.unwrap();
        net.disconnect(B).await.unwrap();
        let v2a = net.edit(A, file_id, EDIT_A).await.unwrap().unwrap();
        let v2b = net.edit(B, file_id, EDIT_B).await.unwrap().unwrap();

        net.connect(A).await.unwrap();
        net.pump().await.unwrap();
        net.connect(B).await.unwrap();
        net.pump().await.unwrap();
        Diverged {
            net,
            file_id,
            v1,
            v2a,
            v2b,
        }
    }

    #[tokio::test]
    async fn second_arrival_raises_a_conflict() {
        let Diverged {
            net,
            file_id,
            v2a,
            v2b,
            ..
        } = diverged().await;

        // A reached the relay first and fast-forwarded.
        let a = net.status(A, file_id).await.unwrap();
        assert_eq!(a.state, FileSyncState::Ready);
        assert_eq!(a.head, Some(v2a));

        let b = net.status(B, file_id).await.unwrap();
        assert_eq!(b.state, FileSyncState::Conflict);
        assert_eq!(b.conflict, Some((v2b, v2a)));
        // Nothing on B's disk was overwritten.
        assert_eq!(net.read(B, file_id).await.unwrap(), EDIT_B);
    }

    #[tokio::test]
    async fn keep_both_leaves_two_siblings_awaiting_a_choice() {
        let Diverged {
            mut net,
            file_id,
            v1,
            v2a,
            v2b,
        } = diverged().await;

        let resolution = net
            .device(B)
            .engine
            .resolve_conflict(file_id, ResolutionChoice::KeepBoth)
            .await
            .unwrap();
        let Resolution::KeepBoth {
            local,
            remote,
            parent,
        } = resolution
        else {
            panic!("expected keep-both");
        };
        assert_eq!(local.version_id, v2b);
        assert_eq!(remote.version_id, v2a);
        assert_eq!(parent, Some(v1));
        net.pump().await.unwrap();

        let history = net.device(B).engine.history(file_id).await;
        assert_siblings(&history, v2a, v2b, v1).assert();
        // Still waiting for an explicit choice.
        let b = net.status(B, file_id).await.unwrap();
        assert_eq!(b.state, FileSyncState::Conflict);
        assert_eq!(b.conflict, Some((v2b, v2a)));

        let snapshots = net.device(B).engine.snapshots();
        assert_eq!(snapshots.get(file_id, v2a).await.unwrap(), EDIT_A);
        assert_eq!(snapshots.get(file_id, v2b).await.unwrap(), EDIT_B);
    }

    #[tokio::test]
    async fn designating_the_local_sibling_converges_both_devices() {
        let Diverged {
            mut net,
            file_id,
            v2a,
            v2b,
            ..
        } = diverged().await;
        let engine = &net.device(B).engine;
        engine
            .resolve_conflict(file_id, ResolutionChoice::KeepBoth)
            .await
            .unwrap();
        let head = engine.designate_head(file_id, v2b).await.unwrap();
        net.pump().await.unwrap();

        let statuses = vec![
            net.status(A, file_id).await.unwrap(),
            net.status(B, file_id).await.unwrap(),
        ];
        assert_single_head(&statuses).assert();
        assert_eq!(statuses[0].head, Some(head));
        assert_eq!(net.read(A, file_id).await.unwrap(), EDIT_B);

        // The published head builds on A's edit, which stays restorable.
        let history = net.device(A).engine.history(file_id).await;
        let record = history.iter().find(|r| r.version_id == head).unwrap();
        assert_eq!(record.parent_version_id, Some(v2a));
        let overruled = net.device(A).engine.snapshots().get(file_id, v2a).await;
        assert_eq!(overruled.unwrap(), EDIT_A);
    }

    #[tokio::test]
    async fn take_remote_keeps_the_overruled_local_edit() {
        let Diverged {
            mut net,
            file_id,
            v2a,
            v2b,
            ..
        } = diverged().await;
        net.device(B)
            .engine
            .resolve_conflict(file_id, ResolutionChoice::TakeRemote)
            .await
            .unwrap();
        net.pump().await.unwrap();

        let b = net.status(B, file_id).await.unwrap();
        assert_eq!(b.state, FileSyncState::Ready);
        assert_eq!(b.head, Some(v2a));
        assert_eq!(net.read(B, file_id).await.unwrap(), EDIT_A);
        let kept = net.device(B).engine.snapshots().get(file_id, v2b).await;
        assert_eq!(kept.unwrap(), EDIT_B);
    }
}
