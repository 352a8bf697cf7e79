//! # sync-relay
//!
//! Coordinating relay for Atrius per-file sync.
//!
//! The relay is the single authority for every file it knows:
//! - Registers devices and tracks which devices are members of which file
//! - Grants and releases single-writer locks, expiring them on a TTL
//! - Decides which version becomes a file's head and acknowledges pushes
//! - Fans chunks and completions out to members, and routes chunk requests
//!   to a device that holds the wanted version
//! - Persists file records (identity, bounded history, device states) so a
//!   restart keeps every head
//!
//! ## Architecture
//!
//! ```text
//! Device A ──┐   length-prefixed    ┌── Device B
//!            │   MessagePack / TCP  │
//!            ├─────────────────────►│
//!        ┌───┴──────────────────────┴───┐
//!        │          sync-relay          │
//!        │  Coordinator (locks, heads)  │
//!        │  SQLite (file records)       │
//!        │  HTTP /health /metrics       │
//!        └──────────────────────────────┘
//! ```
//!
//! Locks are not persisted: after a restart every device
//! re-registers and asks again.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
