//! Process-global registry of named channels.
//!
//! The broker mints channels: [`Broker::request_channel`] allocates a ring,
//! registers it under a unique name, and returns the producer/consumer
//! handle pair. The registry record co-owns the ring with the handles, so
//! late stats queries and [`Broker::shutdown`] always have valid state to
//! look at, no matter when handles drop.
//!
//! The broker itself is created on first access and never destroyed, which
//! removes any destruction-order hazard between it and handles dropped at
//! process exit.
//!
//! # Example
//!
//! ```
//! use courier::{Broker, ChannelConfig};
//!
//! let broker = Broker::instance();
//! let pair = broker
//!     .request_channel("sensor-feed", ChannelConfig::default())
//!     .unwrap();
//! assert!(broker.has_channel("sensor-feed"));
//! # drop(pair);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use minstant::Instant;

use crate::channel::consumer::Consumer;
use crate::channel::producer::Producer;
use crate::config::{ChannelConfig, ChannelError};
use crate::ring::Ring;
use crate::trace;

/// The handle pair for one channel.
///
/// Both handles are move-only; destructure the pair to send each to its
/// thread.
pub struct ChannelPair {
    pub producer: Producer,
    pub consumer: Consumer,
}

impl std::fmt::Debug for ChannelPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPair").finish_non_exhaustive()
    }
}

/// Registry entry for one channel.
struct ChannelRecord {
    ring: Arc<Ring>,
    name: String,
    created_at: Instant,
}

/// Broker statistics snapshot.
///
/// Message and byte totals aggregate the per-channel counters of every
/// currently registered channel and are approximate; the created/destroyed
/// counts are authoritative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Channels currently registered.
    pub active_channels: usize,
    /// Channels created over the broker's lifetime.
    pub total_channels_created: u64,
    /// Channels removed via [`Broker::remove_channel`].
    pub total_channels_destroyed: u64,
    /// Messages published across registered channels (approximate).
    pub total_messages_sent: u64,
    /// Payload bytes published across registered channels (approximate).
    pub total_bytes_transferred: u64,
}

/// Process-global channel registry.
///
/// Obtain it with [`Broker::instance`]; there is exactly one per process.
pub struct Broker {
    registry: RwLock<HashMap<String, ChannelRecord>>,
    total_created: AtomicU64,
    total_destroyed: AtomicU64,
}

impl Broker {
    fn new() -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            total_created: AtomicU64::new(0),
            total_destroyed: AtomicU64::new(0),
        }
    }

    /// The process-global broker, created on first access, never destroyed.
    #[must_use]
    pub fn instance() -> &'static Broker {
        static INSTANCE: OnceLock<Broker> = OnceLock::new();
        INSTANCE.get_or_init(Broker::new)
    }

    /// Creates a channel named `name` and returns its handle pair.
    ///
    /// `config` is normalized (clamped, then rounded) before validation, so
    /// out-of-range values produce a working channel rather than an error.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::InvalidConfig`] - config invalid even after
    ///   normalization
    /// - [`ChannelError::NameExists`] - the name is taken
    /// - [`ChannelError::AllocationFailed`] - the ring buffer could not be
    ///   allocated; the registry is left unchanged
    pub fn request_channel(
        &self,
        name: &str,
        config: ChannelConfig,
    ) -> Result<ChannelPair, ChannelError> {
        let normalized = config.normalize();
        if !normalized.is_valid() {
            return Err(ChannelError::InvalidConfig);
        }

        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());

        if registry.contains_key(name) {
            return Err(ChannelError::NameExists);
        }

        let ring = Ring::allocate(normalized.capacity, normalized.max_message_size)
            .ok_or(ChannelError::AllocationFailed)?;
        let ring = Arc::new(ring);

        registry.insert(
            name.to_string(),
            ChannelRecord {
                ring: Arc::clone(&ring),
                name: name.to_string(),
                created_at: Instant::now(),
            },
        );
        self.total_created.fetch_add(1, Ordering::Relaxed);

        trace::debug!(
            channel = name,
            capacity = normalized.capacity,
            max_message_size = normalized.max_message_size,
            "channel created"
        );

        let producer = Producer::new(Arc::clone(&ring));
        let consumer = Consumer::new(ring);
        Ok(ChannelPair { producer, consumer })
    }

    /// Whether a channel named `name` is registered.
    ///
    /// The answer can be stale as soon as it is returned if another thread
    /// creates or removes the channel concurrently.
    #[must_use]
    pub fn has_channel(&self, name: &str) -> bool {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        registry.contains_key(name)
    }

    /// Removes a channel whose handles are both gone.
    ///
    /// Returns `false` when the name is unknown or either handle is still
    /// alive. Removal only prunes the registry entry; the ring itself is
    /// freed when its last co-owner drops.
    pub fn remove_channel(&self, name: &str) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());

        let Some(record) = registry.get(name) else {
            return false;
        };
        let producer_alive = record.ring.producer_alive.value.load(Ordering::Relaxed);
        let consumer_alive = record.ring.consumer_alive.value.load(Ordering::Relaxed);
        if producer_alive || consumer_alive {
            return false;
        }

        registry.remove(name);
        self.total_destroyed.fetch_add(1, Ordering::Relaxed);
        trace::debug!(channel = name, "channel removed");
        true
    }

    /// Snapshot of registry size and aggregate counters.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());

        let mut total_messages_sent = 0u64;
        let mut total_bytes_transferred = 0u64;
        for record in registry.values() {
            total_messages_sent += record
                .ring
                .producer_counters
                .messages
                .load(Ordering::Relaxed);
            total_bytes_transferred +=
                record.ring.producer_counters.bytes.load(Ordering::Relaxed);
        }

        BrokerStats {
            active_channels: registry.len(),
            total_channels_created: self.total_created.load(Ordering::Relaxed),
            total_channels_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            total_messages_sent,
            total_bytes_transferred,
        }
    }

    /// Signals shutdown to every registered channel.
    ///
    /// Both liveness flags of every channel are cleared and all waiters are
    /// woken, so blocked operations return `Closed` and new operations fail.
    /// Does **not** wait for handles to drop; callers should drop their
    /// handles first if they intend to keep using the process.
    pub fn shutdown(&self) {
        let registry = self.registry.write().unwrap_or_else(|e| e.into_inner());

        trace::info!(channels = registry.len(), "broker shutdown");
        for record in registry.values() {
            record.ring.producer_alive.value.store(false, Ordering::Release);
            record.ring.consumer_alive.value.store(false, Ordering::Release);
            record.ring.write_waiter.notify_one();
            record.ring.read_waiter.notify_one();
        }
    }

    /// Age of a registered channel, if present.
    ///
    /// Mostly useful for diagnostics and tests.
    #[must_use]
    pub fn channel_age(&self, name: &str) -> Option<std::time::Duration> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        registry.get(name).map(|record| {
            debug_assert_eq!(record.name, name);
            record.created_at.elapsed()
        })
    }
}
