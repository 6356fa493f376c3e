//! Write end of a channel.
//!
//! # Overview
//!
//! - [`Producer::try_push`] - copy a payload in, wait-free
//! - [`Producer::blocking_push`] - same, but wait for space up to a deadline
//! - [`Producer::batch_push`] - publish many payloads with one wakeup
//! - [`Producer::reserve`] - zero-copy: claim a slot, write in place, commit
//!
//! Only one producer exists per channel. The handle is `Send` but not
//! `Sync` and cannot be cloned, so moving it to a worker thread is the only
//! way to use it concurrently with the consumer.
//!
//! # Memory ordering
//!
//! Every publication follows the same protocol: relaxed load of the own
//! `write_cursor`, acquire load of the peer `read_cursor`, plain writes of
//! prefix and payload into the claimed slot, release-store of
//! `write_cursor + k`, then exactly one notification per publication event.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{Ordering, fence};

use minstant::Instant;

use crate::channel::{PhantomUnsync, Timeout};
use crate::config::{ChannelConfig, PushError, is_valid_message_size};
use crate::ring::{self, Ring};
use crate::trace;
use crate::wait::spin_wait;

/// Counters kept by the write side. Relaxed, observational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    /// Messages successfully published.
    pub messages_sent: u64,
    /// Payload bytes successfully published.
    pub bytes_sent: u64,
    /// Pushes that returned an error.
    pub failed_pushes: u64,
}

/// Write end of a channel.
///
/// Created by [`Broker::request_channel`](crate::Broker::request_channel).
/// Dropping the producer marks the channel closed for the consumer, which
/// still drains any messages published before the drop.
pub struct Producer {
    ring: Arc<Ring>,
    _unsync: PhantomUnsync,
}

impl Producer {
    pub(crate) fn new(ring: Arc<Ring>) -> Self {
        // Signal producer is alive (release so the peer sees a fully
        // constructed ring behind the flag).
        ring.producer_alive.value.store(true, Ordering::Release);
        Self {
            ring,
            _unsync: PhantomUnsync::default(),
        }
    }

    /// Claims the next free slot for in-place writing.
    ///
    /// Returns `None` when `bytes` is zero or over the channel limit, the
    /// consumer is gone, or the ring is full. The reservation dereferences
    /// to the slot's payload region ([`Producer::max_message_size`] bytes);
    /// nothing is published until [`Reservation::commit`] is called, and
    /// dropping the reservation uncommitted publishes nothing.
    ///
    /// # Example
    ///
    /// ```
    /// # use courier::{Broker, ChannelConfig};
    /// # let pair = Broker::instance()
    /// #     .request_channel("doc-reserve", ChannelConfig::default())
    /// #     .unwrap();
    /// # let (mut producer, mut consumer) = (pair.producer, pair.consumer);
    /// let mut grant = producer.reserve(16).unwrap();
    /// grant[..5].copy_from_slice(b"hello");
    /// assert!(grant.commit(5));
    ///
    /// assert_eq!(consumer.try_pop().unwrap().data(), b"hello");
    /// ```
    #[must_use]
    pub fn reserve(&mut self, bytes: usize) -> Option<Reservation<'_>> {
        if !is_valid_message_size(bytes, self.ring.max_message_size()) {
            return None;
        }
        if !self.ring.consumer_alive.value.load(Ordering::Relaxed) {
            return None;
        }

        let write = self.ring.write_cursor.value.load(Ordering::Relaxed);
        let read = self.ring.read_cursor.value.load(Ordering::Acquire);
        if ring::is_full(write, read, self.ring.capacity()) {
            return None;
        }

        Some(Reservation {
            ring: &self.ring,
            write,
        })
    }

    /// Copies `payload` into the ring and publishes it, wait-free.
    ///
    /// # Errors
    ///
    /// - [`PushError::InvalidSize`] - empty or over the channel limit
    /// - [`PushError::Closed`] - the consumer has been dropped
    /// - [`PushError::QueueFull`] - no free slot right now
    pub fn try_push(&mut self, payload: &[u8]) -> Result<(), PushError> {
        if !is_valid_message_size(payload.len(), self.ring.max_message_size()) {
            return Err(PushError::InvalidSize);
        }
        if !self.ring.consumer_alive.value.load(Ordering::Relaxed) {
            self.count_failure();
            return Err(PushError::Closed);
        }
        if self.publish(payload) {
            Ok(())
        } else {
            self.count_failure();
            Err(PushError::QueueFull)
        }
    }

    /// Copies `payload` into the ring, waiting for space up to `timeout`.
    ///
    /// Uses the hybrid spin-then-yield strategy against a steady-clock
    /// deadline; [`Timeout::Infinite`] disables the deadline entirely. A
    /// consumer disconnect interrupts the wait immediately.
    ///
    /// # Errors
    ///
    /// - [`PushError::InvalidSize`] - empty or over the channel limit
    /// - [`PushError::Closed`] - the consumer has been dropped
    /// - [`PushError::Timeout`] - the deadline expired
    pub fn blocking_push(&mut self, payload: &[u8], timeout: Timeout) -> Result<(), PushError> {
        if !is_valid_message_size(payload.len(), self.ring.max_message_size()) {
            self.count_failure();
            return Err(PushError::InvalidSize);
        }

        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(Instant::now() + d),
        };

        loop {
            if !self.ring.consumer_alive.value.load(Ordering::Relaxed) {
                self.count_failure();
                return Err(PushError::Closed);
            }

            if self.publish(payload) {
                return Ok(());
            }

            if let Some(dl) = deadline
                && Instant::now() >= dl
            {
                self.count_failure();
                return Err(PushError::Timeout);
            }

            let queue = &self.ring;
            spin_wait(|| {
                let read = queue.read_cursor.value.load(Ordering::Acquire);
                let write = queue.write_cursor.value.load(Ordering::Relaxed);
                !ring::is_full(write, read, queue.capacity())
            });
        }
    }

    /// Publishes as many of `messages` as fit, with a single wakeup.
    ///
    /// Validation is fail-fast: if any message is empty or over the limit,
    /// nothing is published and 0 is returned. Consumer liveness is checked
    /// once for the whole batch. Publication stops early when the ring
    /// fills; the return value is the number of messages actually
    /// published, in order, from the front of the slice.
    pub fn batch_push<M: AsRef<[u8]>>(&mut self, messages: &[M]) -> usize {
        if messages.is_empty() {
            return 0;
        }
        for message in messages {
            if !is_valid_message_size(message.as_ref().len(), self.ring.max_message_size()) {
                return 0;
            }
        }
        if !self.ring.consumer_alive.value.load(Ordering::Relaxed) {
            return 0;
        }

        let queue = &self.ring;
        let mut pushed = 0u64;
        let mut total_bytes = 0u64;

        for message in messages {
            let payload = message.as_ref();
            let write = queue.write_cursor.value.load(Ordering::Relaxed);
            let read = queue.read_cursor.value.load(Ordering::Acquire);
            if ring::is_full(write, read, queue.capacity()) {
                break;
            }

            // SAFETY: the slot at `write` is unpublished (full check above)
            // and this handle is the only producer.
            unsafe {
                queue.write_size_prefix(write, payload.len());
                std::ptr::copy_nonoverlapping(
                    payload.as_ptr(),
                    queue.payload_ptr(write),
                    payload.len(),
                );
            }
            queue.write_cursor.value.store(write + 1, Ordering::Release);

            pushed += 1;
            total_bytes += payload.len() as u64;
        }

        // One wakeup and one counter update for the whole batch.
        if pushed > 0 {
            queue.write_waiter.notify_one();
            queue.producer_counters.messages.fetch_add(pushed, Ordering::Relaxed);
            queue.producer_counters.bytes.fetch_add(total_bytes, Ordering::Relaxed);
        }

        pushed as usize
    }

    /// Whether the consumer handle still exists (relaxed, may be stale).
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.ring.consumer_alive.value.load(Ordering::Relaxed)
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

    /// Approximate count of free slots (relaxed loads).
    #[must_use]
    pub fn available_slots(&self) -> usize {
        let write = self.ring.write_cursor.value.load(Ordering::Relaxed);
        let read = self.ring.read_cursor.value.load(Ordering::Relaxed);
        ring::free_slots(write, read, self.ring.capacity())
    }

    /// The normalized configuration this channel was created with.
    #[must_use]
    pub fn config(&self) -> ChannelConfig {
        ChannelConfig {
            capacity: self.ring.capacity(),
            max_message_size: self.ring.max_message_size(),
        }
    }

    /// Snapshot of the write-side counters (relaxed).
    #[must_use]
    pub fn stats(&self) -> ProducerStats {
        ProducerStats {
            messages_sent: self.ring.producer_counters.messages.load(Ordering::Relaxed),
            bytes_sent: self.ring.producer_counters.bytes.load(Ordering::Relaxed),
            failed_pushes: self.ring.producer_counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Writes one pre-validated payload if a slot is free. Returns whether
    /// the message was published.
    fn publish(&self, payload: &[u8]) -> bool {
        let queue = &self.ring;
        let write = queue.write_cursor.value.load(Ordering::Relaxed);
        let read = queue.read_cursor.value.load(Ordering::Acquire);
        if ring::is_full(write, read, queue.capacity()) {
            return false;
        }

        // SAFETY: the slot at `write` is unpublished (full check above) and
        // this handle is the only producer.
        unsafe {
            queue.write_size_prefix(write, payload.len());
            std::ptr::copy_nonoverlapping(payload.as_ptr(), queue.payload_ptr(write), payload.len());
        }

        queue.write_cursor.value.store(write + 1, Ordering::Release);
        queue.write_waiter.notify_one();
        queue.producer_counters.messages.fetch_add(1, Ordering::Relaxed);
        queue.producer_counters
            .bytes
            .fetch_add(payload.len() as u64, Ordering::Relaxed);
        true
    }

    fn count_failure(&self) {
        self.ring.producer_counters.failures.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        // The fence guarantees every slot write published so far is visible
        // to the peer before it can observe the death signal.
        fence(Ordering::SeqCst);
        self.ring.producer_alive.value.store(false, Ordering::Release);
        self.ring.write_waiter.notify_one();
        trace::trace!("producer handle dropped");
    }
}

/// An uncommitted claim on the next ring slot.
///
/// Dereferences to the slot's writable payload region. The borrow on the
/// producer prevents any other operation (including a second reservation)
/// until this one is committed or dropped. Dropping without committing
/// publishes nothing and leaves every cursor and counter untouched.
pub struct Reservation<'a> {
    ring: &'a Arc<Ring>,
    write: u64,
}

impl Reservation<'_> {
    /// Writable capacity of the claimed slot.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.max_message_size()
    }

    /// Publishes the first `actual_bytes` of the slot as one message.
    ///
    /// Returns `false` (and publishes nothing) when `actual_bytes` is zero
    /// or exceeds the slot capacity.
    #[must_use]
    pub fn commit(self, actual_bytes: usize) -> bool {
        if !is_valid_message_size(actual_bytes, self.ring.max_message_size()) {
            return false;
        }

        debug_assert_eq!(
            self.ring.write_cursor.value.load(Ordering::Relaxed),
            self.write
        );

        // SAFETY: the claimed slot stayed unpublished while the reservation
        // held the producer borrow.
        unsafe {
            self.ring.write_size_prefix(self.write, actual_bytes);
        }
        self.ring
            .write_cursor
            .value
            .store(self.write + 1, Ordering::Release);
        self.ring.write_waiter.notify_one();
        self.ring
            .producer_counters
            .messages
            .fetch_add(1, Ordering::Relaxed);
        self.ring
            .producer_counters
            .bytes
            .fetch_add(actual_bytes as u64, Ordering::Relaxed);
        true
    }

    /// Abandons the claim without publishing. Equivalent to dropping.
    pub fn rollback(self) {}
}

impl Deref for Reservation<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the slot is unpublished and exclusively claimed; the
        // payload region is max_message_size bytes by construction.
        unsafe {
            std::slice::from_raw_parts(self.ring.payload_ptr(self.write), self.ring.max_message_size())
        }
    }
}

impl DerefMut for Reservation<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in Deref; the exclusive producer borrow makes this the
        // only live reference to these bytes.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.ring.payload_ptr(self.write),
                self.ring.max_message_size(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PopError;
    use crate::test_support::pair;

    #[test]
    fn try_push_and_counters() {
        let (mut producer, _consumer) = pair(16, 256);

        assert_eq!(producer.try_push(&[1, 2, 3, 4]), Ok(()));
        let stats = producer.stats();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.bytes_sent, 4);
        assert_eq!(stats.failed_pushes, 0);
    }

    #[test]
    fn try_push_rejects_invalid_sizes() {
        let (mut producer, _consumer) = pair(16, 256);

        assert_eq!(producer.try_push(&[]), Err(PushError::InvalidSize));
        assert_eq!(producer.try_push(&[0u8; 257]), Err(PushError::InvalidSize));
        // Invalid size leaves the ring untouched.
        assert_eq!(producer.available_slots(), 15);
        assert_eq!(producer.stats().messages_sent, 0);
    }

    #[test]
    fn try_push_reports_full() {
        let (mut producer, _consumer) = pair(8, 64);

        for i in 0..7u8 {
            assert_eq!(producer.try_push(&[i]), Ok(()));
        }
        // capacity - 1 slots usable; the eighth push must fail.
        assert_eq!(producer.try_push(&[7]), Err(PushError::QueueFull));
        assert_eq!(producer.available_slots(), 0);
        assert_eq!(producer.stats().failed_pushes, 1);
    }

    #[test]
    fn try_push_after_consumer_drop() {
        let (mut producer, consumer) = pair(8, 64);
        drop(consumer);

        assert!(!producer.is_connected());
        assert_eq!(producer.try_push(&[1]), Err(PushError::Closed));
    }

    #[test]
    fn reserve_commit_roundtrip() {
        let (mut producer, mut consumer) = pair(8, 256);

        let mut grant = producer.reserve(128).expect("reserve");
        assert_eq!(grant.capacity(), 256);
        grant[..64].copy_from_slice(&[0xAB; 64]);
        assert!(grant.commit(64));

        let msg = consumer.try_pop().expect("pop");
        assert_eq!(msg.len(), 64);
        assert!(msg.data().iter().all(|&b| b == 0xAB));
        drop(msg);

        // Previous reservation committed, a fresh one is available.
        assert!(producer.reserve(1).is_some());
    }

    #[test]
    fn reserve_preconditions() {
        let (mut producer, _consumer) = pair(8, 64);

        assert!(producer.reserve(0).is_none());
        assert!(producer.reserve(65).is_none());
        assert!(producer.reserve(64).is_some());
    }

    #[test]
    fn reserve_fails_when_full() {
        let (mut producer, _consumer) = pair(8, 64);
        for i in 0..7u8 {
            producer.try_push(&[i]).unwrap();
        }
        assert!(producer.reserve(1).is_none());
    }

    #[test]
    fn reserve_fails_after_consumer_drop() {
        let (mut producer, consumer) = pair(8, 64);
        drop(consumer);
        assert!(producer.reserve(1).is_none());
    }

    #[test]
    fn rollback_is_idempotent_noop() {
        let (mut producer, _consumer) = pair(8, 64);

        let before_stats = producer.stats();
        let before_slots = producer.available_slots();

        // Repeated reserve/rollback cycles leave no trace.
        for _ in 0..3 {
            let grant = producer.reserve(32).expect("reserve");
            grant.rollback();
        }
        // Dropping uncommitted behaves the same.
        for _ in 0..3 {
            let _grant = producer.reserve(32).expect("reserve");
        }

        assert_eq!(producer.stats(), before_stats);
        assert_eq!(producer.available_slots(), before_slots);
    }

    #[test]
    fn commit_rejects_invalid_sizes() {
        let (mut producer, _consumer) = pair(8, 64);

        let grant = producer.reserve(32).expect("reserve");
        assert!(!grant.commit(0));
        let grant = producer.reserve(32).expect("reserve");
        assert!(!grant.commit(65));

        // Failed commits published nothing.
        assert_eq!(producer.stats().messages_sent, 0);
        assert_eq!(producer.available_slots(), 7);
    }

    #[test]
    fn blocking_push_times_out_when_full() {
        let (mut producer, _consumer) = pair(4, 64);
        for i in 0..3u8 {
            producer.try_push(&[i]).unwrap();
        }

        let start = std::time::Instant::now();
        let result = producer.blocking_push(
            &[9],
            Timeout::Duration(std::time::Duration::from_millis(100)),
        );
        let waited = start.elapsed();

        assert_eq!(result, Err(PushError::Timeout));
        assert!(waited >= std::time::Duration::from_millis(100));
        assert!(waited < std::time::Duration::from_millis(2000), "waited {waited:?}");
        assert_eq!(producer.stats().failed_pushes, 1);
    }

    #[test]
    fn blocking_push_returns_closed_immediately() {
        let (mut producer, consumer) = pair(4, 64);
        for i in 0..3u8 {
            producer.try_push(&[i]).unwrap();
        }
        drop(consumer);

        // Queue is full, but the dead peer short-circuits the wait.
        let result = producer.blocking_push(&[9], Timeout::Infinite);
        assert_eq!(result, Err(PushError::Closed));
    }

    #[test]
    fn batch_push_publishes_in_order() {
        let (mut producer, mut consumer) = pair(16, 64);

        let messages: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 4]).collect();
        assert_eq!(producer.batch_push(&messages), 10);
        assert_eq!(producer.stats().messages_sent, 10);
        assert_eq!(producer.stats().bytes_sent, 40);

        for i in 0..10u8 {
            let msg = consumer.try_pop().expect("pop");
            assert_eq!(msg.data(), &[i; 4]);
        }
        assert_eq!(consumer.try_pop().unwrap_err(), PopError::Empty);
    }

    #[test]
    fn batch_push_stops_at_full() {
        let (mut producer, _consumer) = pair(8, 64);

        let messages: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i]).collect();
        // Only capacity - 1 slots exist.
        assert_eq!(producer.batch_push(&messages), 7);
    }

    #[test]
    fn batch_push_fail_fast_validation() {
        let (mut producer, _consumer) = pair(16, 64);

        let messages: Vec<Vec<u8>> = vec![vec![1; 4], vec![], vec![2; 4]];
        assert_eq!(producer.batch_push(&messages), 0);
        // Atomic validation: nothing was published.
        assert_eq!(producer.stats().messages_sent, 0);
        assert_eq!(producer.available_slots(), 15);
    }

    #[test]
    fn batch_push_notifies_once() {
        let (mut producer, mut consumer) = pair(256, 64);

        let before = producer
            .ring
            .write_waiter
            .notifications
            .load(Ordering::Relaxed);

        let messages: Vec<Vec<u8>> = (0..100u16).map(|i| i.to_le_bytes().to_vec()).collect();
        assert_eq!(producer.batch_push(&messages), 100);

        let after = producer
            .ring
            .write_waiter
            .notifications
            .load(Ordering::Relaxed);
        assert_eq!(after - before, 1, "batch must wake the consumer exactly once");

        for i in 0..100u16 {
            let msg = consumer.try_pop().expect("pop");
            assert_eq!(msg.data(), i.to_le_bytes());
        }
    }

    #[test]
    fn batch_push_skips_dead_consumer() {
        let (mut producer, consumer) = pair(16, 64);
        drop(consumer);
        let messages: Vec<Vec<u8>> = vec![vec![1]];
        assert_eq!(producer.batch_push(&messages), 0);
    }

    #[test]
    fn accessors_report_config() {
        let (producer, _consumer) = pair(32, 128);
        assert_eq!(producer.capacity(), 32);
        assert_eq!(producer.max_message_size(), 128);
        let config = producer.config();
        assert_eq!(config.capacity, 32);
        assert_eq!(config.max_message_size, 128);
    }
}
