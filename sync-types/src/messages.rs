//! Protocol messages for Atrius Sync.
//!
//! A closed set of tagged variants. Every message is checked with
//! [`Message::validate`] at the boundary before any handler sees it.

use serde::{Deserialize, Serialize};

use crate::{
    ContentHash, DeviceId, FileId, FileSyncState, LockMode, LockRecord, SessionId, VersionId,
    VersionRecord, WireError,
};

/// Largest encoded message accepted on the wire.
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Largest chunk payload a `file/chunk` may carry.
pub const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Longest device name accepted at registration.
pub const MAX_NAME_LEN: usize = 256;

const MAX_ERROR_LEN: usize = 4096;

/// All possible protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Announce a device on a new connection
    #[serde(rename = "device/register")]
    DeviceRegister(DeviceRegister),
    /// Relay response to registration
    #[serde(rename = "device/registered")]
    DeviceRegistered(DeviceRegistered),
    /// Join a file's membership
    #[serde(rename = "file/register")]
    FileRegister(FileRegister),
    /// Relay response to a join
    #[serde(rename = "file/registered")]
    FileRegistered(FileRegistered),
    /// Membership changed
    #[serde(rename = "presence/update")]
    PresenceUpdate(PresenceUpdate),
    /// Request the file lock
    #[serde(rename = "lock/acquire")]
    LockAcquire(LockAcquire),
    /// Give up the file lock
    #[serde(rename = "lock/release")]
    LockRelease(LockRelease),
    /// Current lock owner, broadcast to members
    #[serde(rename = "lock/state")]
    LockState(LockState),
    /// Lock request refused
    #[serde(rename = "lock/denied")]
    LockDenied(LockDenied),
    /// One chunk of a version's content
    #[serde(rename = "file/chunk")]
    FileChunk(FileChunk),
    /// End of a version stream; triggers the conflict check
    #[serde(rename = "file/complete")]
    FileComplete(FileComplete),
    /// Ask a holder to (re)send specific chunks
    #[serde(rename = "file/chunk-request")]
    ChunkRequest(ChunkRequest),
    /// Relay verdict on a pushed version
    #[serde(rename = "file/ack")]
    FileAck(FileAck),
    /// Device reports its state for a file
    #[serde(rename = "file/state")]
    FileState(FileStateReport),
    /// Informational error
    #[serde(rename = "file/error")]
    FileError(FileError),
    /// Graceful disconnect
    #[serde(rename = "device/bye")]
    Bye(Bye),
}

impl Message {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(WireError::MessageTooLarge {
                size: bytes.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }

    /// Decode and validate in one step.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let message = Self::from_bytes(bytes)?;
        message.validate()?;
        Ok(message)
    }

    /// Wire name of this message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::DeviceRegister(_) => "device/register",
            Message::DeviceRegistered(_) => "device/registered",
            Message::FileRegister(_) => "file/register",
            Message::FileRegistered(_) => "file/registered",
            Message::PresenceUpdate(_) => "presence/update",
            Message::LockAcquire(_) => "lock/acquire",
            Message::LockRelease(_) => "lock/release",
            Message::LockState(_) => "lock/state",
            Message::LockDenied(_) => "lock/denied",
            Message::FileChunk(_) => "file/chunk",
            Message::FileComplete(_) => "file/complete",
            Message::ChunkRequest(_) => "file/chunk-request",
            Message::FileAck(_) => "file/ack",
            Message::FileState(_) => "file/state",
            Message::FileError(_) => "file/error",
            Message::Bye(_) => "device/bye",
        }
    }

    /// The file this message concerns, if any.
    pub fn file_id(&self) -> Option<FileId> {
        match self {
            Message::DeviceRegister(_) | Message::DeviceRegistered(_) | Message::Bye(_) => None,
            Message::FileRegister(m) => Some(m.file_id),
            Message::FileRegistered(m) => Some(m.file_id),
            Message::PresenceUpdate(m) => Some(m.file_id),
            Message::LockAcquire(m) => Some(m.file_id),
            Message::LockRelease(m) => Some(m.file_id),
            Message::LockState(m) => Some(m.file_id),
            Message::LockDenied(m) => Some(m.file_id),
            Message::FileChunk(m) => Some(m.file_id),
            Message::FileComplete(m) => Some(m.file_id),
            Message::ChunkRequest(m) => Some(m.file_id),
            Message::FileAck(m) => Some(m.file_id),
            Message::FileState(m) => Some(m.file_id),
            Message::FileError(m) => m.file_id,
        }
    }

    /// Structural checks that serde cannot express.
    pub fn validate(&self) -> Result<(), WireError> {
        let invalid = |reason: String| Err(WireError::InvalidMessage(reason));
        match self {
            Message::DeviceRegister(m) => {
                if let Some(name) = &m.name {
                    if name.len() > MAX_NAME_LEN {
                        return invalid(format!("device name exceeds {} bytes", MAX_NAME_LEN));
                    }
                }
            }
            Message::FileChunk(m) => {
                if m.total == 0 {
                    return invalid("chunk total must be at least 1".into());
                }
                if m.seq >= m.total {
                    return invalid(format!("chunk seq {} out of range 0..{}", m.seq, m.total));
                }
                if m.chunk_bytes.len() > MAX_CHUNK_SIZE {
                    return invalid(format!("chunk of {} bytes too large", m.chunk_bytes.len()));
                }
                if m.size > u64::from(m.total) * MAX_CHUNK_SIZE as u64 {
                    return invalid(format!(
                        "{} bytes cannot fit in {} chunks",
                        m.size, m.total
                    ));
                }
            }
            Message::FileComplete(m) => {
                if m.version.file_id != m.file_id {
                    return invalid("version belongs to another file".into());
                }
                check_layout(&m.version).map_err(WireError::InvalidMessage)?;
            }
            Message::FileRegistered(m) => {
                for version in m.version.iter().chain(&m.history) {
                    if version.file_id != m.file_id {
                        return invalid("version belongs to another file".into());
                    }
                    check_layout(version).map_err(WireError::InvalidMessage)?;
                }
            }
            Message::ChunkRequest(m) => {
                if m.seqs.windows(2).any(|w| w[0] >= w[1]) {
                    return invalid("chunk request seqs must be strictly ascending".into());
                }
            }
            Message::LockAcquire(m) => {
                if m.user_id.len() > MAX_NAME_LEN {
                    return invalid("user id too long".into());
                }
            }
            Message::FileError(m) => {
                if m.message.len() > MAX_ERROR_LEN {
                    return invalid("error message too long".into());
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// The chunk layout of a version must agree with its declared size.
fn check_layout(version: &VersionRecord) -> Result<(), String> {
    let chunks = version.chunk_hashes.len() as u64;
    if chunks == 0 {
        return Err("version has no chunks".into());
    }
    if version.chunk_size == 0 || version.chunk_size as usize > MAX_CHUNK_SIZE {
        return Err(format!("chunk size {} out of range", version.chunk_size));
    }
    let expected = version
        .size_bytes
        .div_ceil(u64::from(version.chunk_size))
        .max(1);
    if chunks != expected {
        return Err(format!(
            "{} bytes in chunks of {} make {} chunks, not {}",
            version.size_bytes, version.chunk_size, expected, chunks
        ));
    }
    Ok(())
}

/// Device registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegister {
    /// Known id on reconnect; `None` asks the relay to mint one
    pub device_id: Option<DeviceId>,
    /// Human-readable device name
    pub name: Option<String>,
}

/// Registration accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistered {
    /// The device's id for this and later sessions
    pub device_id: DeviceId,
}

/// Join a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRegister {
    /// File being joined
    pub file_id: FileId,
    /// Local content size (0 if absent)
    pub size: u64,
    /// Local modification time (Unix seconds, 0 if absent)
    pub mtime: u64,
}

/// Join accepted, with what a new member needs to catch up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRegistered {
    /// File joined
    pub file_id: FileId,
    /// Current members, including the joiner
    pub members: Vec<DeviceId>,
    /// Authoritative head, if any
    pub version: Option<VersionRecord>,
    /// Authoritative history window, oldest first
    pub history: Vec<VersionRecord>,
    /// Live lock, if any
    pub lock: Option<LockRecord>,
}

/// Membership broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// File whose membership changed
    pub file_id: FileId,
    /// Current members
    pub members: Vec<DeviceId>,
}

/// Lock request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockAcquire {
    /// File to lock
    pub file_id: FileId,
    /// Requesting device
    pub device_id: DeviceId,
    /// User on whose behalf the lock is held
    pub user_id: String,
    /// Exclusive or override
    pub mode: LockMode,
    /// Auto-lock around a single push
    pub auto_lock: bool,
}

/// Lock release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRelease {
    /// File to unlock
    pub file_id: FileId,
    /// Releasing device
    pub device_id: DeviceId,
    /// Mode the lock was requested with
    pub mode: LockMode,
}

/// Current lock for a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    /// File concerned
    pub file_id: FileId,
    /// Live lock, or `None` when released
    pub owner: Option<LockRecord>,
}

/// Lock refused because another device holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDenied {
    /// File concerned
    pub file_id: FileId,
    /// Current owner
    pub holder: DeviceId,
    /// When the owner acquired it
    pub acquired_at: u64,
}

/// One chunk of content.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    /// File concerned
    pub file_id: FileId,
    /// Sender's transfer session
    pub session_id: SessionId,
    /// Version the content belongs to
    pub version: VersionId,
    /// Zero-based sequence number
    pub seq: u32,
    /// Total chunk count
    pub total: u32,
    /// Chunk payload
    pub chunk_bytes: Vec<u8>,
    /// Hash of `chunk_bytes`
    pub chunk_hash: ContentHash,
    /// Declared whole-file hash
    pub content_hash: ContentHash,
    /// Declared whole-file size
    pub size: u64,
    /// Source modification time (Unix seconds)
    pub mtime: u64,
    /// Single recipient for targeted resends; `None` fans out to members
    pub to: Option<DeviceId>,
}

impl std::fmt::Debug for FileChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChunk")
            .field("file_id", &self.file_id)
            .field("version", &self.version)
            .field("seq", &self.seq)
            .field("total", &self.total)
            .field("len", &self.chunk_bytes.len())
            .field("to", &self.to)
            .finish()
    }
}

/// End of a version stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileComplete {
    /// File concerned
    pub file_id: FileId,
    /// The version just streamed
    pub version: VersionRecord,
    /// Source modification time (Unix seconds)
    pub mtime: u64,
    /// Single recipient for targeted resends; `None` fans out to members
    pub to: Option<DeviceId>,
}

/// Request for specific chunks of a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequest {
    /// File concerned
    pub file_id: FileId,
    /// Version wanted
    pub version: VersionId,
    /// Sequences wanted, ascending; empty means all
    pub seqs: Vec<u32>,
    /// Device that wants them
    pub requester: DeviceId,
    /// Preferred holder; the relay picks one when `None`
    pub holder: Option<DeviceId>,
}

/// Relay verdict on a pushed version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAck {
    /// File concerned
    pub file_id: FileId,
    /// Version pushed
    pub version: VersionId,
    /// Whether it became the authoritative head
    pub accepted: bool,
    /// Authoritative head after the decision
    pub head: Option<VersionId>,
    /// Lock owner, when refused because another device holds the lock
    pub locked_by: Option<DeviceId>,
    /// Why it was refused
    pub reason: Option<String>,
}

/// Device state report for a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStateReport {
    /// File concerned
    pub file_id: FileId,
    /// Reporting device's state
    pub state: FileSyncState,
    /// Head the device holds
    pub head: Option<VersionId>,
    /// Most recent error
    pub error: Option<String>,
}

/// Informational error, logged by receivers and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    /// File concerned, if any
    pub file_id: Option<FileId>,
    /// Description
    pub message: String,
}

/// Graceful disconnect message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bye {
    /// Optional reason for disconnect
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: u32, total: u32, bytes: &[u8]) -> FileChunk {
        FileChunk {
            file_id: FileId::new(),
            session_id: SessionId::new(),
            version: VersionId::new(),
            seq,
            total,
            chunk_bytes: bytes.to_vec(),
            chunk_hash: ContentHash::of(bytes),
            content_hash: ContentHash::of(bytes),
            size: bytes.len() as u64,
            mtime: 0,
            to: None,
        }
    }

    #[test]
    fn register_roundtrip() {
        let msg = Message::DeviceRegister(DeviceRegister {
            device_id: Some(DeviceId::random()),
            name: Some("Studio Mac".into()),
        });
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(Message::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn chunk_roundtrip_preserves_payload() {
        let msg = Message::FileChunk(chunk(2, 5, &[7u8; 1024]));
        let restored = Message::decode(&msg.to_bytes().unwrap()).unwrap();
        match restored {
            Message::FileChunk(c) => {
                assert_eq!(c.seq, 2);
                assert_eq!(c.chunk_bytes.len(), 1024);
                assert!(c.chunk_hash.verify(&c.chunk_bytes));
            }
            other => panic!("expected chunk, got {:?}", other),
        }
    }

    #[test]
    fn lock_state_roundtrip_with_none() {
        let msg = Message::LockState(LockState {
            file_id: FileId::new(),
            owner: None,
        });
        assert_eq!(Message::from_bytes(&msg.to_bytes().unwrap()).unwrap(), msg);
    }

    #[test]
    fn json_uses_wire_names() {
        let msg = Message::Bye(Bye { reason: None });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "device/bye");
        assert_eq!(msg.kind(), "device/bye");
    }

    #[test]
    fn chunk_seq_out_of_range_rejected() {
        let msg = Message::FileChunk(chunk(5, 5, b"x"));
        assert!(matches!(msg.validate(), Err(WireError::InvalidMessage(_))));
        let msg = Message::FileChunk(chunk(0, 0, b"x"));
        assert!(msg.validate().is_err());
    }

    fn complete(size_bytes: u64, chunk_size: u32, chunks: usize) -> Message {
        let file_id = FileId::new();
        Message::FileComplete(FileComplete {
            file_id,
            version: VersionRecord {
                version_id: VersionId::new(),
                file_id,
                parent_version_id: None,
                origin_device_id: DeviceId::random(),
                timestamp: 0,
                content_hash: ContentHash::of(b"x"),
                size_bytes,
                chunk_size,
                chunk_hashes: vec![ContentHash::of(b"x"); chunks],
            },
            mtime: 0,
            to: None,
        })
    }

    #[test]
    fn version_layout_must_match_size() {
        assert!(complete(10, 4, 3).validate().is_ok());
        assert!(complete(0, 4, 1).validate().is_ok());
        assert!(complete(u64::MAX, 4, 3).validate().is_err());
        assert!(complete(10, 4, 2).validate().is_err());
        assert!(complete(10, 0, 3).validate().is_err());
        assert!(complete(0, 4, 0).validate().is_err());
    }

    #[test]
    fn chunk_size_bounded_by_total() {
        let mut msg = chunk(0, 2, b"x");
        msg.size = 2 * MAX_CHUNK_SIZE as u64 + 1;
        assert!(Message::FileChunk(msg).validate().is_err());
    }

    #[test]
    fn oversized_name_rejected() {
        let msg = Message::DeviceRegister(DeviceRegister {
            device_id: None,
            name: Some("x".repeat(MAX_NAME_LEN + 1)),
        });
        assert!(msg.validate().is_err());
    }

    #[test]
    fn unsorted_chunk_request_rejected() {
        let msg = Message::ChunkRequest(ChunkRequest {
            file_id: FileId::new(),
            version: VersionId::new(),
            seqs: vec![3, 1],
            requester: DeviceId::random(),
            holder: None,
        });
        assert!(msg.validate().is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            Message::from_bytes(&[0xc1, 0x00, 0xff]),
            Err(WireError::Deserialization(_))
        ));
    }

    #[test]
    fn file_id_is_exposed() {
        let file_id = FileId::new();
        let msg = Message::FileRegister(FileRegister {
            file_id,
            size: 0,
            mtime: 0,
        });
        assert_eq!(msg.file_id(), Some(file_id));
        assert_eq!(Message::Bye(Bye { reason: None }).file_id(), None);
    }
}
