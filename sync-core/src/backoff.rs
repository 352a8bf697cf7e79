//! Retry policy with exponential backoff and jitter.
//!
//! Jitter keeps many devices from retrying in lockstep after a relay
//! restart. It is the only source of randomness in this crate and only
//! affects timing, never decisions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How failed transfers are retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts allowed before surfacing `error`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay for the first retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on the exponential part.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Random jitter added on top (0..=jitter_ms).
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    1_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` failures.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// Formula: min(max_delay, base * 2^(attempt-1)) + random(0..=jitter)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(base + random_jitter_ms(self.jitter_ms))
    }
}

fn random_jitter_ms(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0;
    }
    u64::from_le_bytes(bytes) % (max + 1)
}
