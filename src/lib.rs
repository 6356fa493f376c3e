//! Named in-process SPSC byte-message channels with zero-copy send/receive.
//!
//! courier is a registry of named, lock-free, single-producer/single-consumer
//! channels for threads within one process. Each channel is a fixed-capacity
//! ring of length-prefixed byte messages with blocking, non-blocking, batch,
//! and zero-copy reserve/commit operations, plus RAII peer-disconnect
//! detection: dropping one handle is immediately observable by the other.
//!
//! # Overview
//!
//! - [`Broker`] - process-global registry; mints channels by name
//! - [`Producer`] - write end: `try_push`, `blocking_push`, `batch_push`,
//!   zero-copy [`Producer::reserve`]
//! - [`Consumer`] - read end: `try_pop`, `blocking_pop`, `batch_pop`
//! - [`Message`] - zero-copy view of a received payload
//!
//! Handles are move-only and `Send` but not `Sync`; give each to exactly one
//! thread and the SPSC contract holds by construction.
//!
//! # Example
//!
//! ```
//! use courier::{Broker, ChannelConfig, ChannelPair};
//!
//! let broker = Broker::instance();
//! let ChannelPair { mut producer, mut consumer } = broker
//!     .request_channel("telemetry", ChannelConfig { capacity: 16, max_message_size: 256 })
//!     .unwrap();
//!
//! producer.try_push(&[0x01, 0x02, 0x03, 0x04]).unwrap();
//!
//! let msg = consumer.try_pop().unwrap();
//! assert_eq!(msg.data(), &[1, 2, 3, 4]);
//! ```
//!
//! # Guarantees
//!
//! - FIFO delivery per channel; no ordering across channels
//! - A successful push is always observable by a live consumer
//! - At most `capacity - 1` messages are resident at once
//! - Consumers drain remaining messages before observing a disconnect

mod broker;
mod channel;
mod config;
mod ring;
mod trace;
mod wait;

pub use broker::{Broker, BrokerStats, ChannelPair};
pub use channel::consumer::{Consumer, ConsumerStats, Message, OwnedMessage};
pub use channel::producer::{Producer, ProducerStats, Reservation};
pub use channel::Timeout;
pub use config::{
    ChannelConfig, ChannelError, DEFAULT_CAPACITY, DEFAULT_MESSAGE_SIZE, MAX_CAPACITY,
    MAX_MESSAGE_SIZE, MIN_CAPACITY, MIN_MESSAGE_SIZE, PopError, PushError,
};

pub use trace::init_tracing;

/// Builds a detached handle pair over a fresh ring, for unit tests.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::channel::consumer::Consumer;
    use crate::channel::producer::Producer;
    use crate::ring::Ring;

    pub fn pair(capacity: usize, max_message_size: usize) -> (Producer, Consumer) {
        let ring = Arc::new(Ring::allocate(capacity, max_message_size).expect("ring allocation"));
        (Producer::new(Arc::clone(&ring)), Consumer::new(ring))
    }
}
