//! Multi-device scenarios.
//!
//! - `handoff` - a device that missed a locked push catches up on reconnect
//! - `conflict` - offline edits from one head diverge, are kept and settled
//! - `identity` - renames keep the file identity and head
//! - `transfer` - interrupted pulls resume with only the missing chunks
//! - `locks` - one lock per file, blocked pushes resume on release

pub mod conflict;
pub mod handoff;
pub mod identity;
pub mod locks;
pub mod transfer;

/// Index of the first device in two-device scenarios.
pub const A: usize = 0;
/// Index of the second device in two-device scenarios.
pub const B: usize = 1;
