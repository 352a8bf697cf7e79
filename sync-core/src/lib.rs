//! # sync-core
//!
//! Pure logic for Atrius per-file sync (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms for sync
//! without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (network, disk) is performed by `sync-client` on devices
//! and by `sync-relay` on the authority, both of which interpret the actions
//! and messages produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod conflict;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod lock;
pub mod presence;
pub mod state;
pub mod transfer;

pub use backoff::RetryPolicy;
pub use conflict::{
    designate_head, resolve, retain_candidates, ConflictCandidates, ConflictError, Resolution,
    ResolutionChoice,
};
pub use coordinator::{Coordinator, CoordinatorConfig, Outgoing};
pub use error::{Result, SyncError};
pub use history::{HistoryError, RetentionPolicy, VersionHistory};
pub use lock::{LockCoordinator, LockDenial, LockGrant, LockRequest};
pub use presence::{Departure, DevicePresence, PresenceRegistry};
pub use state::{Action, Event, FileSync, LockHold, Pending, SyncEvent, SyncPolicy, SyncState};
pub use transfer::{
    describe, open_inbound, split, Chunk, ChunkOutcome, InboundTransfer, OutboundTransfer,
    TransferError, TransferSession, DEFAULT_CHUNK_SIZE,
};
