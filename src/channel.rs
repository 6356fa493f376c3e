//! Producer and consumer endpoints of a channel.
//!
//! A channel's two handles are created together by
//! [`Broker::request_channel`](crate::Broker::request_channel) and jointly
//! own the ring with the broker's registry record. Each handle is move-only
//! and `Send` but not `Sync`: transferring one to another thread is fine,
//! sharing one between threads is a compile error. That is the whole SPSC
//! enforcement story.

use std::cell::Cell;
use std::marker::PhantomData;
use std::time::Duration;

pub mod consumer;
pub mod producer;

pub use consumer::{Consumer, ConsumerStats, Message, OwnedMessage};
pub use producer::{Producer, ProducerStats, Reservation};

/// Timeout specification for blocking operations.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Marker type to opt-out of `Sync` while remaining `Send`.
pub(crate) type PhantomUnsync = PhantomData<Cell<&'static ()>>;
