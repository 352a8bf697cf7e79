//! Rate limiting for sync-relay.
//!
//! Connection attempts are limited per peer IP, since a device id is only
//! known after `device/register`. Messages are limited per [`DeviceId`], and
//! a global limiter caps aggregate throughput.
//!
//! Both keyed limiters use governor backed by DashMap.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use sync_types::DeviceId;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits connection attempts per peer address.
    connection_limiter: Arc<KeyedLimiter<IpAddr>>,

    /// Limits messages per registered device.
    message_limiter: Arc<KeyedLimiter<DeviceId>>,

    /// Caps aggregate throughput even when every device is within its quota.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("connection_limiter", &"KeyedLimiter<IpAddr>")
            .field("message_limiter", &"KeyedLimiter<DeviceId>")
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

/// A zero quota would reject everything; treat it as one.
fn at_least_one(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

impl RateLimits {
    /// Create rate limiters from configuration.
    pub fn new(config: &LimitsConfig) -> Self {
        let connection_quota = Quota::per_minute(at_least_one(config.connections_per_minute));
        let message_quota = Quota::per_minute(at_least_one(config.messages_per_minute));
        let global_quota = Quota::per_second(at_least_one(config.global_requests_per_second));

        Self {
            connection_limiter: Arc::new(RateLimiter::keyed(connection_quota)),
            message_limiter: Arc::new(RateLimiter::keyed(message_quota)),
            global_limiter: Arc::new(RateLimiter::direct(global_quota)),
        }
    }

    /// Check if a connection attempt from `peer` is allowed.
    pub fn check_connection(&self, peer: IpAddr) -> Result<(), RateLimitError> {
        self.connection_limiter
            .check_key(&peer)
            .map_err(|_| RateLimitError::ConnectionLimitExceeded)
    }

    /// Check if a message from `device` is allowed.
    pub fn check_message(&self, device: &DeviceId) -> Result<(), RateLimitError> {
        self.message_limiter
            .check_key(device)
            .map_err(|_| RateLimitError::MessageLimitExceeded)
    }

    /// Check if the global request rate is within limits.
    pub fn check_global(&self) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Get the number of tracked connection keys (for metrics).
    pub fn connection_keys_count(&self) -> usize {
        self.connection_limiter.len()
    }

    /// Get the number of tracked message keys (for metrics).
    pub fn message_keys_count(&self) -> usize {
        self.message_limiter.len()
    }

    /// Evict idle entries from the keyed limiters.
    ///
    /// Entries whose cells have fully recharged are dropped. Called from the
    /// cleanup task.
    pub fn shrink(&self) {
        self.connection_limiter.retain_recent();
        self.message_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// Too many connection attempts from this address.
    ConnectionLimitExceeded,
    /// Too many messages from this device.
    MessageLimitExceeded,
    /// Global request rate exceeded across all devices.
    GlobalLimitExceeded,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLimitExceeded => {
                write!(f, "connection rate limit exceeded")
            }
            Self::MessageLimitExceeded => {
                write!(f, "message rate limit exceeded")
            }
            Self::GlobalLimitExceeded => {
                write!(f, "global rate limit exceeded")
            }
        }
    }
}

impl std::error::Error for RateLimitError {}
