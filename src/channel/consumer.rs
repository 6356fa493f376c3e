//! Read end of a channel.
//!
//! # Overview
//!
//! - [`Consumer::try_pop`] - wait-free, returns a zero-copy [`Message`] view
//! - [`Consumer::blocking_pop`] - wait for a message up to a deadline
//! - [`Consumer::batch_pop`] - drain many messages with one wakeup
//!
//! A producer disconnect is observed lazily: remaining messages drain
//! normally and only an empty ring reports
//! [`PopError::Closed`](crate::PopError::Closed).
//!
//! # Message views
//!
//! [`Message`] borrows its payload bytes directly from the ring slot, so a
//! pop copies nothing. The view holds the consumer's exclusive borrow: no
//! further pop can happen until it is dropped, and dropping it is what
//! returns the slot to the producer (release-store of `read_cursor + 1`
//! plus one notification per receive event).

use std::sync::Arc;
use std::sync::atomic::{Ordering, fence};

use minstant::Instant;

use crate::channel::{PhantomUnsync, Timeout};
use crate::config::{ChannelConfig, PopError};
use crate::ring::{self, Ring};
use crate::trace;
use crate::wait::spin_wait;

/// Counters kept by the read side. Relaxed, observational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Messages received.
    pub messages_received: u64,
    /// Payload bytes received.
    pub bytes_received: u64,
    /// Pops that returned `Closed` or `Timeout`.
    pub failed_pops: u64,
}

/// Outcome of a non-blocking readiness probe.
enum Poll {
    /// A message is published and readable.
    Ready,
    /// Nothing published; the producer is still alive.
    Empty {
        /// The write cursor value observed, for the wait primitive.
        write: u64,
    },
    /// Nothing published and the producer is gone.
    Closed,
}

/// Read end of a channel.
///
/// Created by [`Broker::request_channel`](crate::Broker::request_channel).
/// Dropping the consumer marks the channel closed for the producer; pushes
/// fail from then on.
pub struct Consumer {
    ring: Arc<Ring>,
    _unsync: PhantomUnsync,
}

impl Consumer {
    pub(crate) fn new(ring: Arc<Ring>) -> Self {
        ring.consumer_alive.value.store(true, Ordering::Release);
        Self {
            ring,
            _unsync: PhantomUnsync::default(),
        }
    }

    /// Takes the oldest published message, wait-free.
    ///
    /// The returned [`Message`] borrows the ring slot in place; drop it to
    /// hand the slot back to the producer.
    ///
    /// # Errors
    ///
    /// - [`PopError::Empty`] - nothing published right now
    /// - [`PopError::Closed`] - ring drained and the producer is gone
    pub fn try_pop(&mut self) -> Result<Message<'_>, PopError> {
        match self.poll() {
            Poll::Ready => Ok(self.take_message()),
            Poll::Empty { .. } => Err(PopError::Empty),
            Poll::Closed => {
                self.count_failure();
                Err(PopError::Closed)
            }
        }
    }

    /// Waits for a message up to `timeout`.
    ///
    /// With [`Timeout::Infinite`] the consumer parks on the write cursor and
    /// is woken by a publication, a producer drop, or a broker shutdown.
    /// With a finite timeout it uses the hybrid spin-then-yield strategy
    /// against a steady-clock deadline.
    ///
    /// # Errors
    ///
    /// - [`PopError::Timeout`] - the deadline expired
    /// - [`PopError::Closed`] - ring drained and the producer is gone
    pub fn blocking_pop(&mut self, timeout: Timeout) -> Result<Message<'_>, PopError> {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(Instant::now() + d),
        };

        loop {
            match self.poll() {
                Poll::Ready => return Ok(self.take_message()),
                Poll::Closed => {
                    self.count_failure();
                    return Err(PopError::Closed);
                }
                Poll::Empty { write } => match deadline {
                    None => {
                        // Park until the write cursor moves or a peer
                        // signals; spurious wakeups just loop back to poll.
                        self.ring.write_waiter.wait(&self.ring.write_cursor.value, write);
                    }
                    Some(dl) => {
                        if Instant::now() >= dl {
                            self.count_failure();
                            return Err(PopError::Timeout);
                        }
                        let queue = &self.ring;
                        spin_wait(|| {
                            let read = queue.read_cursor.value.load(Ordering::Relaxed);
                            let write = queue.write_cursor.value.load(Ordering::Acquire);
                            !ring::is_empty(read, write, queue.capacity())
                                || !queue.producer_alive.value.load(Ordering::Relaxed)
                        });
                    }
                },
            }
        }
    }

    /// Drains up to `max_count` messages, waiting for the first one.
    ///
    /// A positive timeout (or [`Timeout::Infinite`]) blocks for the first
    /// message only; the rest of the batch is whatever is already published.
    /// Payloads are copied out into [`OwnedMessage`]s so the slots return to
    /// the producer as the drain advances, with a single wakeup at the end.
    ///
    /// # Errors
    ///
    /// - [`PopError::Empty`] - `max_count` is zero, or nothing published and
    ///   no timeout was given
    /// - [`PopError::Timeout`] - no first message before the deadline
    /// - [`PopError::Closed`] - ring drained and the producer is gone
    ///
    /// An error always means zero messages were collected.
    pub fn batch_pop(
        &mut self,
        max_count: usize,
        timeout: Timeout,
    ) -> Result<Vec<OwnedMessage>, PopError> {
        if max_count == 0 {
            return Err(PopError::Empty);
        }

        let mut messages = Vec::with_capacity(max_count.min(self.ring.capacity()));

        let wait_for_first = match timeout {
            Timeout::Infinite => true,
            Timeout::Duration(d) => !d.is_zero(),
        };
        if wait_for_first {
            match self.blocking_pop(timeout) {
                Ok(message) => messages.push(message.to_owned_message()),
                Err(e) => return Err(e),
            }
        }

        let queue = Arc::clone(&self.ring);
        while messages.len() < max_count {
            let read = queue.read_cursor.value.load(Ordering::Relaxed);
            let write = queue.write_cursor.value.load(Ordering::Acquire);
            if ring::is_empty(read, write, queue.capacity()) {
                break;
            }

            // SAFETY: the slot at `read` is published (empty check above)
            // and this handle is the only consumer.
            let payload = unsafe {
                let len = queue.read_size_prefix(read);
                debug_assert!(len > 0 && len <= queue.max_message_size());
                std::slice::from_raw_parts(queue.payload_ptr(read), len)
            };
            messages.push(OwnedMessage {
                data: payload.into(),
            });

            // The payload is copied out, so the slot can go back to the
            // producer immediately.
            queue.read_cursor.value.store(read + 1, Ordering::Release);
            queue.consumer_counters.messages.fetch_add(1, Ordering::Relaxed);
            queue.consumer_counters
                .bytes
                .fetch_add(payload.len() as u64, Ordering::Relaxed);
        }

        if !messages.is_empty() {
            // One wakeup for the whole drain.
            queue.read_waiter.notify_one();
            Ok(messages)
        } else if !queue.producer_alive.value.load(Ordering::Relaxed) {
            self.count_failure();
            Err(PopError::Closed)
        } else {
            Err(PopError::Empty)
        }
    }

    /// Whether the producer handle still exists (relaxed, may be stale).
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.ring.producer_alive.value.load(Ordering::Relaxed)
    }

    /// Ring capacity in slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Maximum payload size in bytes.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.ring.max_message_size()
    }

    /// Approximate count of published, unread messages (relaxed loads).
    #[must_use]
    pub fn available_messages(&self) -> usize {
        let read = self.ring.read_cursor.value.load(Ordering::Relaxed);
        let write = self.ring.write_cursor.value.load(Ordering::Relaxed);
        ring::pending_messages(read, write, self.ring.capacity())
    }

    /// The normalized configuration this channel was created with.
    #[must_use]
    pub fn config(&self) -> ChannelConfig {
        ChannelConfig {
            capacity: self.ring.capacity(),
            max_message_size: self.ring.max_message_size(),
        }
    }

    /// Snapshot of the read-side counters (relaxed).
    #[must_use]
    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            messages_received: self.ring.consumer_counters.messages.load(Ordering::Relaxed),
            bytes_received: self.ring.consumer_counters.bytes.load(Ordering::Relaxed),
            failed_pops: self.ring.consumer_counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Checks for a readable message without constructing a view.
    fn poll(&self) -> Poll {
        let producer_alive = self.ring.producer_alive.value.load(Ordering::Relaxed);
        let read = self.ring.read_cursor.value.load(Ordering::Relaxed);
        let write = self.ring.write_cursor.value.load(Ordering::Acquire);

        if ring::is_empty(read, write, self.ring.capacity()) {
            if producer_alive {
                Poll::Empty { write }
            } else {
                Poll::Closed
            }
        } else {
            Poll::Ready
        }
    }

    /// Builds the view for the slot at the read cursor.
    ///
    /// Caller must have observed `Poll::Ready`; being the only consumer, the
    /// slot cannot have disappeared since.
    fn take_message(&mut self) -> Message<'_> {
        let read = self.ring.read_cursor.value.load(Ordering::Relaxed);
        // SAFETY: the slot at `read` is published and not yet released.
        let len = unsafe { self.ring.read_size_prefix(read) };
        debug_assert!(len > 0 && len <= self.ring.max_message_size());

        self.ring.consumer_counters.messages.fetch_add(1, Ordering::Relaxed);
        self.ring
            .consumer_counters
            .bytes
            .fetch_add(len as u64, Ordering::Relaxed);

        Message {
            ring: &self.ring,
            read,
            len,
        }
    }

    fn count_failure(&self) {
        self.ring.consumer_counters.failures.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        // The fence guarantees every cursor release so far is visible to the
        // peer before it can observe the death signal.
        fence(Ordering::SeqCst);
        self.ring.consumer_alive.value.store(false, Ordering::Release);
        self.ring.read_waiter.notify_one();
        trace::trace!("consumer handle dropped");
    }
}

/// A received message, borrowing its payload from the ring slot.
///
/// The view keeps the consumer exclusively borrowed, so it cannot outlive
/// the slot it points into: the next pop is only possible after this view
/// is dropped, and the drop is what releases the slot to the producer.
pub struct Message<'a> {
    ring: &'a Arc<Ring>,
    read: u64,
    len: usize,
}

impl Message<'_> {
    /// The payload bytes, in place in the queue.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        // SAFETY: the slot stays published until this view drops; len was
        // written by the producer's commit and bounds-checked there.
        unsafe { std::slice::from_raw_parts(self.ring.payload_ptr(self.read), self.len) }
    }

    /// Payload length in bytes. Always non-zero.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies the payload into an owned message.
    #[must_use]
    pub fn to_owned_message(&self) -> OwnedMessage {
        OwnedMessage {
            data: self.data().into(),
        }
    }
}

impl Drop for Message<'_> {
    fn drop(&mut self) {
        // Hand the slot back: release-store so the producer's acquire load
        // sees our read finished, then one wakeup per receive event.
        self.ring
            .read_cursor
            .value
            .store(self.read + 1, Ordering::Release);
        self.ring.read_waiter.notify_one();
    }
}

impl std::fmt::Debug for Message<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message").field("len", &self.len).finish()
    }
}

/// A received message that owns its payload.
///
/// Produced by [`Consumer::batch_pop`], where slots are released during the
/// drain and the bytes therefore cannot be borrowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMessage {
    data: Box<[u8]>,
}

impl OwnedMessage {
    /// The payload bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload length in bytes. Always non-zero.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consumes the message, returning the payload.
    #[must_use]
    pub fn into_bytes(self) -> Box<[u8]> {
        self.data
    }
}
