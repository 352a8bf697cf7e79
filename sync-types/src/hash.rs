//! Content hashing.
//!
//! Whole-file and per-chunk hashes are BLAKE3-256.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A BLAKE3 digest of file or chunk content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash a byte slice.
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Wrap a raw 32-byte digest.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether `bytes` hashes to this digest.
    pub fn verify(&self, bytes: &[u8]) -> bool {
        Self::of(bytes) == *self
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let decoded = hex::decode(s).ok()?;
        let bytes: [u8; 32] = decoded.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Incremental hasher, for content that arrives in pieces.
    pub fn hasher() -> ContentHasher {
        ContentHasher(blake3::Hasher::new())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &hex::encode(self.0)[..12])
    }
}

/// Streaming form of [`ContentHash::of`].
pub struct ContentHasher(blake3::Hasher);

impl ContentHasher {
    /// Feed more bytes.
    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update(bytes);
        self
    }

    /// Produce the digest.
    pub fn finalize(&self) -> ContentHash {
        ContentHash(*self.0.finalize().as_bytes())
    }
}
