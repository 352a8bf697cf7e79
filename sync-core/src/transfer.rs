//! Chunked transfer: splitting, verification, resumption.
//!
//! Content moves as ordered, individually hashed chunks. A receiver verifies
//! each chunk as it arrives, in any order, and only ever asks again for the
//! sequences it is missing or that failed verification. Partially received
//! content is never handed out: [`InboundTransfer::assemble`] only succeeds
//! once every chunk is present and the whole-file hash matches.

use std::collections::{BTreeMap, BTreeSet};
use sync_types::{
    ContentHash, DeviceId, FileChunk, FileId, SessionId, TransferDirection, VersionId,
    VersionRecord,
};
use thiserror::Error;

/// Default chunk size (256 KiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 256 * 1024;

/// Errors from transfer sessions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    /// Sequence number beyond the declared total
    #[error("chunk {seq} out of range (total {total})")]
    OutOfRange {
        /// Offending sequence
        seq: u32,
        /// Declared total
        total: u32,
    },

    /// Chunk belongs to another version than the session
    #[error("chunk for version {actual} sent to session for {expected}")]
    WrongVersion {
        /// Session's version
        expected: VersionId,
        /// Chunk's version
        actual: VersionId,
    },

    /// Assembly attempted before every chunk arrived
    #[error("{missing} chunks still missing")]
    Incomplete {
        /// How many are missing
        missing: usize,
    },

    /// Assembled content does not match the declared hash or size
    #[error("integrity check failed: expected {expected}, got {actual}")]
    Integrity {
        /// Declared whole-file hash
        expected: ContentHash,
        /// Hash of the assembled content
        actual: ContentHash,
        /// First chunk to request again, if one could be identified
        retry_from: Option<u32>,
    },

    /// Local content does not match the version being sent
    #[error("content does not match version {0}")]
    ContentMismatch(VersionId),
}

/// Result alias for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// One piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based sequence number.
    pub seq: u32,
    /// Payload.
    pub data: Vec<u8>,
    /// Hash of `data`.
    pub hash: ContentHash,
}

/// Split content into ordered, hashed chunks.
///
/// Empty content yields a single empty chunk so every version has at least
/// one sequence number.
pub fn split(content: &[u8], chunk_size: u32) -> Vec<Chunk> {
    let size = chunk_size.max(1) as usize;
    if content.is_empty() {
        return vec![Chunk {
            seq: 0,
            data: Vec::new(),
            hash: ContentHash::of(&[]),
        }];
    }
    content
        .chunks(size)
        .enumerate()
        .map(|(seq, data)| Chunk {
            seq: seq as u32,
            data: data.to_vec(),
            hash: ContentHash::of(data),
        })
        .collect()
}

/// Build the record describing new content.
pub fn describe(
    file_id: FileId,
    parent_version_id: Option<VersionId>,
    origin_device_id: DeviceId,
    timestamp: u64,
    content: &[u8],
    chunk_size: u32,
) -> VersionRecord {
    let chunk_size = chunk_size.max(1);
    VersionRecord {
        version_id: VersionId::new(),
        file_id,
        parent_version_id,
        origin_device_id,
        timestamp,
        content_hash: ContentHash::of(content),
        size_bytes: content.len() as u64,
        chunk_size,
        chunk_hashes: split(content, chunk_size).into_iter().map(|c| c.hash).collect(),
    }
}

/// Observable shape of a transfer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSession {
    /// Session id.
    pub session_id: SessionId,
    /// File concerned.
    pub file_id: FileId,
    /// Push or pull.
    pub direction: TransferDirection,
    /// Sending device.
    pub from_device_id: DeviceId,
    /// Receiving device; `None` for a fan-out push.
    pub to_device_id: Option<DeviceId>,
    /// Declared chunk count.
    pub expected_total_chunks: u32,
    /// Verified sequences.
    pub received_chunks: BTreeSet<u32>,
    /// Version being moved.
    pub declared_version_id: VersionId,
    /// Declared size.
    pub declared_size: u64,
    /// Failed attempts so far.
    pub retry_count: u32,
}

/// Result of feeding one chunk to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Stored; more chunks outstanding.
    Accepted,
    /// Already held; nothing changed.
    Duplicate,
    /// Hash mismatch; discarded and must be requested again.
    Rejected {
        /// Sequence to request again.
        seq: u32,
    },
    /// Stored, and every chunk is now present.
    Complete,
}

/// Receiving side of a transfer.
#[derive(Debug, Clone)]
pub struct InboundTransfer {
    session_id: SessionId,
    file_id: FileId,
    version: VersionId,
    from: DeviceId,
    to: DeviceId,
    total: u32,
    declared_size: u64,
    declared_hash: ContentHash,
    expected: Option<Vec<ContentHash>>,
    received: BTreeMap<u32, Vec<u8>>,
    retry_count: u32,
    last_progress: u64,
}

impl InboundTransfer {
    /// Session opened from the first chunk of a stream.
    pub fn from_chunk(chunk: &FileChunk, from: DeviceId, to: DeviceId, now: u64) -> Self {
        Self {
            session_id: chunk.session_id,
            file_id: chunk.file_id,
            version: chunk.version,
            from,
            to,
            total: chunk.total,
            declared_size: chunk.size,
            declared_hash: chunk.content_hash,
            expected: None,
            received: BTreeMap::new(),
            retry_count: 0,
            last_progress: now,
        }
    }

    /// Session opened to pull a known version.
    pub fn for_record(record: &VersionRecord, from: DeviceId, to: DeviceId, now: u64) -> Self {
        Self {
            session_id: SessionId::new(),
            file_id: record.file_id,
            version: record.version_id,
            from,
            to,
            total: record.total_chunks().max(1),
            declared_size: record.size_bytes,
            declared_hash: record.content_hash,
            expected: Some(record.chunk_hashes.clone()),
            received: BTreeMap::new(),
            retry_count: 0,
            last_progress: now,
        }
    }

    /// Session id.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Version being received.
    pub fn version(&self) -> VersionId {
        self.version
    }

    /// Sending device.
    pub fn from(&self) -> DeviceId {
        self.from
    }

    /// Failed attempts so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Count one more failed attempt and return the new total.
    pub fn record_retry(&mut self, now: u64) -> u32 {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_progress = now;
        self.retry_count
    }

    /// Learn the authoritative chunk hashes once the version record is known.
    ///
    /// Chunks already held that disagree are dropped; their sequences are
    /// returned so they can be requested again.
    pub fn set_expected(&mut self, record: &VersionRecord) -> Vec<u32> {
        self.total = record.total_chunks().max(1);
        self.declared_size = record.size_bytes;
        self.declared_hash = record.content_hash;
        let mut dropped = Vec::new();
        self.received.retain(|seq, data| {
            let ok = record
                .chunk_hashes
                .get(*seq as usize)
                .is_some_and(|h| h.verify(data));
            if !ok {
                dropped.push(*seq);
            }
            ok
        });
        self.expected = Some(record.chunk_hashes.clone());
        dropped
    }

    /// Verify and store one chunk.
    pub fn receive_chunk(
        &mut self,
        seq: u32,
        bytes: &[u8],
        hash: ContentHash,
        now: u64,
    ) -> TransferResult<ChunkOutcome> {
        if seq >= self.total {
            return Err(TransferError::OutOfRange {
                seq,
                total: self.total,
            });
        }
        if self.received.contains_key(&seq) {
            return Ok(ChunkOutcome::Duplicate);
        }
        let expected_ok = match &self.expected {
            Some(hashes) => hashes.get(seq as usize) == Some(&hash),
            None => true,
        };
        if !expected_ok || !hash.verify(bytes) {
            return Ok(ChunkOutcome::Rejected { seq });
        }
        self.received.insert(seq, bytes.to_vec());
        self.last_progress = now;
        if self.is_complete() {
            Ok(ChunkOutcome::Complete)
        } else {
            Ok(ChunkOutcome::Accepted)
        }
    }

    /// Feed a wire chunk, checking it belongs to this session's version.
    pub fn receive(&mut self, chunk: &FileChunk, now: u64) -> TransferResult<ChunkOutcome> {
        if chunk.version != self.version {
            return Err(TransferError::WrongVersion {
                expected: self.version,
                actual: chunk.version,
            });
        }
        self.receive_chunk(chunk.seq, &chunk.chunk_bytes, chunk.chunk_hash, now)
    }

    /// Sequences not yet verified, ascending.
    pub fn missing(&self) -> Vec<u32> {
        (0..self.total)
            .filter(|seq| !self.received.contains_key(seq))
            .collect()
    }

    /// Number of verified chunks.
    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    /// Whether every declared chunk is present.
    pub fn is_complete(&self) -> bool {
        self.received.len() as u32 == self.total
    }

    /// Whether no chunk has arrived for longer than `timeout_secs`.
    pub fn is_stalled(&self, now: u64, timeout_secs: u64) -> bool {
        !self.is_complete() && now.saturating_sub(self.last_progress) > timeout_secs
    }

    /// Concatenate the chunks and verify the whole-file hash and size.
    ///
    /// On failure the chunks that disagree with the expected chunk hashes are
    /// dropped so a retry starts from the first bad sequence.
    pub fn assemble(&mut self) -> TransferResult<Vec<u8>> {
        if !self.is_complete() {
            return Err(TransferError::Incomplete {
                missing: self.missing().len(),
            });
        }
        let held = self.received.values().map(Vec::len).sum();
        let mut content = Vec::with_capacity(held);
        for data in self.received.values() {
            content.extend_from_slice(data);
        }
        let actual = ContentHash::of(&content);
        if actual == self.declared_hash && content.len() as u64 == self.declared_size {
            return Ok(content);
        }

        let mut retry_from = None;
        if let Some(expected) = &self.expected {
            let bad: Vec<u32> = self
                .received
                .iter()
                .filter(|(seq, data)| {
                    !expected
                        .get(**seq as usize)
                        .is_some_and(|h| h.verify(data))
                })
                .map(|(seq, _)| *seq)
                .collect();
            retry_from = bad.first().copied();
            for seq in bad {
                self.received.remove(&seq);
            }
        }
        Err(TransferError::Integrity {
            expected: self.declared_hash,
            actual,
            retry_from,
        })
    }

    /// Observable session state.
    pub fn summary(&self) -> TransferSession {
        TransferSession {
            session_id: self.session_id,
            file_id: self.file_id,
            direction: TransferDirection::Pull,
            from_device_id: self.from,
            to_device_id: Some(self.to),
            expected_total_chunks: self.total,
            received_chunks: self.received.keys().copied().collect(),
            declared_version_id: self.version,
            declared_size: self.declared_size,
            retry_count: self.retry_count,
        }
    }
}

/// Put `incoming` into a file's inbound slot.
///
/// A session for the same version resumes: verified chunks are kept and only
/// the session id and sender change. A session for another version replaces
/// the old one, whose partial data is returned for discarding.
pub fn open_inbound(
    slot: &mut Option<InboundTransfer>,
    incoming: InboundTransfer,
) -> Option<InboundTransfer> {
    match slot {
        Some(existing) if existing.version == incoming.version => {
            existing.session_id = incoming.session_id;
            existing.from = incoming.from;
            existing.last_progress = existing.last_progress.max(incoming.last_progress);
            if existing.expected.is_none() && incoming.expected.is_some() {
                existing.expected = incoming.expected;
                existing.total = incoming.total;
            }
            None
        }
        _ => slot.replace(incoming),
    }
}

/// Sending side of a transfer.
#[derive(Debug, Clone)]
pub struct OutboundTransfer {
    session_id: SessionId,
    record: VersionRecord,
    from: DeviceId,
    retry_count: u32,
}

impl OutboundTransfer {
    /// New push session for a version.
    pub fn new(record: VersionRecord, from: DeviceId) -> Self {
        Self {
            session_id: SessionId::new(),
            record,
            from,
            retry_count: 0,
        }
    }

    /// Session id.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Version being pushed.
    pub fn record(&self) -> &VersionRecord {
        &self.record
    }

    /// Failed attempts so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Count one more failed attempt and return the new total.
    pub fn record_retry(&mut self) -> u32 {
        self.retry_count = self.retry_count.saturating_add(1);
        self.retry_count
    }

    /// Wire chunks for `content`.
    ///
    /// `seqs` selects specific sequences for a targeted resend; `None`
    /// produces the whole stream. `to` addresses a single device.
    pub fn frames(
        &self,
        content: &[u8],
        seqs: Option<&[u32]>,
        mtime: u64,
        to: Option<DeviceId>,
    ) -> TransferResult<Vec<FileChunk>> {
        if ContentHash::of(content) != self.record.content_hash {
            return Err(TransferError::ContentMismatch(self.record.version_id));
        }
        let chunks = split(content, self.record.chunk_size);
        let total = chunks.len() as u32;
        let wanted = |seq: u32| seqs.map_or(true, |s| s.is_empty() || s.contains(&seq));
        Ok(chunks
            .into_iter()
            .filter(|c| wanted(c.seq))
            .map(|c| FileChunk {
                file_id: self.record.file_id,
                session_id: self.session_id,
                version: self.record.version_id,
                seq: c.seq,
                total,
                chunk_bytes: c.data,
                chunk_hash: c.hash,
                content_hash: self.record.content_hash,
                size: self.record.size_bytes,
                mtime,
                to,
            })
            .collect())
    }

    /// Observable session state.
    pub fn summary(&self) -> TransferSession {
        TransferSession {
            session_id: self.session_id,
            file_id: self.record.file_id,
            direction: TransferDirection::Push,
            from_device_id: self.from,
            to_device_id: None,
            expected_total_chunks: self.record.total_chunks(),
            received_chunks: BTreeSet::new(),
            declared_version_id: self.record.version_id,
            declared_size: self.record.size_bytes,
            retry_count: self.retry_count,
        }
    }
}
