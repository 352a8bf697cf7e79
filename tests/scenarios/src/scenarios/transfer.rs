//! Chunked transfers that are cut short.

#[cfg(test)]
mod tests {
    use crate::harness::{Network, CHUNK_SIZE};
    use crate::scenarios::{A, B};
    use sync_types::{unix_timestamp, ContentHash, FileSyncState, Message};

    const CLIP: &[u8] = b"0123456789abcdefghij";

    fn chunk_requests(net: &Network, device: usize) -> Vec<Vec<u32>> {
        net.sent_by(device)
            .into_iter()
            .filter_map(|m| match m {
                Message::ChunkRequest(r) => Some(r.seqs.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn interrupted_pull_resumes_with_only_missing_chunks() {
        let mut net = Network::online(2).await.unwrap();
        let file_id = net.publish(A, "clip.wav", CLIP).await.unwrap();
        let head = net.status(A, file_id).await.unwrap().head.unwrap();
        let total = CLIP.len().div_ceil(CHUNK_SIZE as usize) as u32;
        let kept = 2;

        // B joins, but only the first chunks reach it.
        let b = net.device(B).id();
        let path = net.device(B).path("clip.wav");
        net.device(B)
            .engine
            .track_remote(file_id, &path)
            .await
            .unwrap();
        net.pump_filtered(|to, m| match m {
            Message::FileChunk(c) if to == b => c.seq < kept,
            _ => true,
        })
        .await
        .unwrap();
        assert_eq!(net.status(B, file_id).await.unwrap().state, FileSyncState::Pulling);
        assert!(!path.exists());

        // Nothing arrives for a while: the pull errors out but stays resumable.
        net.device(B)
            .engine
            .check_stalled(unix_timestamp() + 3600)
            .await;
        let status = net.status(B, file_id).await.unwrap();
        assert_eq!(status.state, FileSyncState::Error);
        assert!(status.error.is_some());

        net.device(B).engine.retry(file_id).await.unwrap();
        net.pump().await.unwrap();

        let requests = chunk_requests(&net, B);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], (0..total).collect::<Vec<_>>());
        assert_eq!(requests[1], (kept..total).collect::<Vec<_>>());

        let status = net.status(B, file_id).await.unwrap();
        assert_eq!(status.state, FileSyncState::Ready);
        assert_eq!(status.head, Some(head));
        let content = net.read(B, file_id).await.unwrap();
        assert_eq!(content, CLIP);
        let record = net
            .device(B)
            .engine
            .history(file_id)
            .await
            .into_iter()
            .find(|r| r.version_id == head)
            .unwrap();
        assert_eq!(ContentHash::of(&content), record.content_hash);
        assert!(net.device(B).engine.transfers(file_id).await.is_empty());
    }

    #[tokio::test]
    async fn holder_leaving_mid_pull_leaves_chunks_for_later() {
        let mut net = Network::online(2).await.unwrap();
        let file_id = net.publish(A, "clip.wav", CLIP).await.unwrap();

        let b = net.device(B).id();
        net.device(B)
            .engine
            .track_remote(file_id, net.device(B).path("clip.wav"))
            .await
            .unwrap();
        net.pump_filtered(|to, m| !matches!(m, Message::FileChunk(c) if to == b && c.seq >= 1))
            .await
            .unwrap();
        net.disconnect(A).await.unwrap();

        // With the only holder gone, the relay cannot serve the retry.
        net.device(B)
            .engine
            .check_stalled(unix_timestamp() + 3600)
            .await;
        net.device(B).engine.retry(file_id).await.unwrap();
        net.pump().await.unwrap();
        assert_ne!(net.status(B, file_id).await.unwrap().state, FileSyncState::Ready);

        net.connect(A).await.unwrap();
        net.pump().await.unwrap();
        net.device(B)
            .engine
            .check_stalled(unix_timestamp() + 7200)
            .await;
        net.device(B).engine.retry(file_id).await.unwrap();
        net.pump().await.unwrap();

        let status = net.status(B, file_id).await.unwrap();
        assert_eq!(status.state, FileSyncState::Ready);
        assert_eq!(net.read(B, file_id).await.unwrap(), CLIP);
        // Every request after the first asked only for what was missing.
        let requests = chunk_requests(&net, B);
        assert!(requests.iter().skip(1).all(|seqs| !seqs.contains(&0)));
    }
}
