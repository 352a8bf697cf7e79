//! # atrius-sync-scenarios
//!
//! Multi-device scenario tests for Atrius per-file sync.
//!
//! Every device is a real [`SyncEngine`](sync_client::SyncEngine) with its own
//! working directory. Their traffic is routed in-process through a real
//! [`Coordinator`](sync_core::Coordinator), so whole-system properties can be
//! checked deterministically:
//!
//! - Identity stability across renames
//! - Single head once conflicts are settled
//! - At most one live lock per file
//! - No silent loss of either side of a conflict
//! - Chunk resumability after an interrupted pull

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assertions;
pub mod harness;

pub mod scenarios;
