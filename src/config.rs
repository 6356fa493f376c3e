//! Channel configuration and operation result types.
//!
//! [`ChannelConfig`] carries the two knobs a channel has: ring capacity and
//! maximum message size. Out-of-range values are not errors; they are
//! normalized (clamped, then rounded) before validation, so callers can pass
//! rough numbers and get a working channel.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest allowed ring capacity (slots).
pub const MIN_CAPACITY: usize = 8;

/// Largest allowed ring capacity (slots).
pub const MAX_CAPACITY: usize = 524_288;

/// Smallest allowed per-message payload limit in bytes.
pub const MIN_MESSAGE_SIZE: usize = 64;

/// Largest allowed per-message payload limit in bytes (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16_777_216;

/// Default ring capacity when none is specified.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Default per-message payload limit when none is specified.
pub const DEFAULT_MESSAGE_SIZE: usize = 4096;

/// Upper bound on any message length before slot-size arithmetic.
///
/// Accounts for the 4-byte length prefix and up to 8 bytes of alignment
/// padding, so `align_up(4 + len, 8)` can never overflow `usize`.
pub(crate) const MAX_SAFE_MESSAGE_SIZE: usize = usize::MAX - 12;

/// Validates a payload length against a channel's message-size limit.
///
/// Rejects empty payloads, payloads over the channel limit, and lengths
/// large enough to overflow slot-size arithmetic.
#[inline]
#[must_use]
pub(crate) const fn is_valid_message_size(len: usize, max_message_size: usize) -> bool {
    len > 0 && len <= max_message_size && len <= MAX_SAFE_MESSAGE_SIZE
}

/// Configuration for a single channel.
///
/// Values are normalized by [`ChannelConfig::normalize`] before a channel is
/// created: capacities are clamped into [`MIN_CAPACITY`]..=[`MAX_CAPACITY`]
/// and rounded up to a power of two, message sizes are clamped into
/// [`MIN_MESSAGE_SIZE`]..=[`MAX_MESSAGE_SIZE`].
///
/// # Example
///
/// ```
/// use courier::ChannelConfig;
///
/// let config = ChannelConfig { capacity: 1000, ..ChannelConfig::default() };
/// assert_eq!(config.normalize().capacity, 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Ring buffer capacity in slots. Rounded up to a power of two.
    pub capacity: usize,
    /// Maximum payload size in bytes. Not rounded.
    pub max_message_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_message_size: DEFAULT_MESSAGE_SIZE,
        }
    }
}

impl ChannelConfig {
    /// Returns a copy with both fields forced into their valid ranges.
    ///
    /// Clamping happens before the power-of-two rounding: rounding first
    /// could push a just-over-limit capacity past [`MAX_CAPACITY`].
    #[must_use]
    pub fn normalize(self) -> Self {
        let capacity = self
            .capacity
            .clamp(MIN_CAPACITY, MAX_CAPACITY)
            .next_power_of_two();
        let max_message_size = self.max_message_size.clamp(MIN_MESSAGE_SIZE, MAX_MESSAGE_SIZE);
        Self {
            capacity,
            max_message_size,
        }
    }

    /// Checks that the configuration can back a channel as-is.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.capacity >= MIN_CAPACITY
            && self.capacity <= MAX_CAPACITY
            && self.capacity.is_power_of_two()
            && self.max_message_size >= MIN_MESSAGE_SIZE
            && self.max_message_size <= MAX_MESSAGE_SIZE
    }
}

/// Reasons a push did not publish a message.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The ring has no free slot. Retry, drop, or block.
    #[error("queue is full")]
    QueueFull,
    /// The deadline expired before a slot freed up.
    #[error("push timed out")]
    Timeout,
    /// The consumer handle has been dropped.
    #[error("consumer disconnected")]
    Closed,
    /// Payload was empty or exceeded the channel's message size limit.
    #[error("invalid message size")]
    InvalidSize,
}

/// Reasons a pop did not return a message.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// No message is currently available.
    #[error("queue is empty")]
    Empty,
    /// The deadline expired before a message arrived.
    #[error("pop timed out")]
    Timeout,
    /// The producer handle has been dropped and the ring is drained.
    #[error("producer disconnected")]
    Closed,
}

/// Reasons the broker refused to create a channel.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// A channel with this name is already registered.
    #[error("channel name already exists")]
    NameExists,
    /// The configuration is invalid even after normalization.
    #[error("invalid channel configuration")]
    InvalidConfig,
    /// The ring buffer allocation failed.
    #[error("channel allocation failed")]
    AllocationFailed,
}
