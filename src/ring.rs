//! Core lock-free SPSC ring buffer state.
//!
//! The ring owns the slot storage and the atomic state shared by a
//! producer/consumer handle pair. It deliberately has no push/pop methods:
//! all protocol policy (memory ordering, validation, blocking) lives in the
//! handles, which are the only trusted users of this module.
//!
//! # Layout
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │ write_cursor (64-byte aligned)         │  producer-owned
//! ├────────────────────────────────────────┤
//! │ read_cursor (64-byte aligned)          │  consumer-owned
//! ├────────────────────────────────────────┤
//! │ producer_alive (64-byte aligned)       │
//! ├────────────────────────────────────────┤
//! │ consumer_alive (64-byte aligned)       │
//! ├────────────────────────────────────────┤
//! │ waiters, counters, config, buffer ptr  │
//! └────────────────────────────────────────┘
//! ```
//!
//! Each cursor and each liveness flag occupies a private cache line so the
//! producer and consumer never contend on the same line in the hot path.
//!
//! # Slot format
//!
//! Each slot is `slot_size = align_up(4 + max_message_size, 8)` bytes:
//! a 4-byte little-endian length prefix, then up to `max_message_size`
//! payload bytes. Bytes past the payload are stale and never read.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64};

use crate::wait::Waiter;

/// Width of the per-slot length prefix in bytes.
pub(crate) const SIZE_PREFIX_BYTES: usize = 4;

const CACHE_LINE: usize = 64;

/// Monotonic 64-bit position counter on its own cache line.
#[repr(C, align(64))]
pub(crate) struct Cursor {
    pub value: AtomicU64,
}

impl Cursor {
    const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
}

/// Single-writer liveness flag on its own cache line.
#[repr(C, align(64))]
pub(crate) struct AliveFlag {
    pub value: AtomicBool,
}

impl AliveFlag {
    const fn new() -> Self {
        Self {
            value: AtomicBool::new(true),
        }
    }
}

/// Relaxed observational counters for one side of a channel.
///
/// These live on the ring rather than in the handles so the broker can still
/// aggregate totals after a handle has been dropped. They are never used for
/// synchronization.
#[derive(Default)]
pub(crate) struct TransferCounters {
    pub messages: AtomicU64,
    pub bytes: AtomicU64,
    pub failures: AtomicU64,
}

/// Shared state of one SPSC channel.
///
/// Co-owned (via `Arc`) by the broker's registry record, the producer handle,
/// and the consumer handle; freed when the last co-owner drops it.
#[repr(C)]
pub(crate) struct Ring {
    /// Next slot the producer will publish. Written only by the producer.
    pub write_cursor: Cursor,
    /// Next slot the consumer will read. Written only by the consumer.
    pub read_cursor: Cursor,
    /// Cleared exactly once, by the producer handle's drop.
    pub producer_alive: AliveFlag,
    /// Cleared exactly once, by the consumer handle's drop.
    pub consumer_alive: AliveFlag,

    /// Wakes waiters blocked on `write_cursor` changes (the consumer).
    pub write_waiter: Waiter,
    /// Wakes waiters blocked on `read_cursor` changes (the producer).
    pub read_waiter: Waiter,

    pub producer_counters: TransferCounters,
    pub consumer_counters: TransferCounters,

    capacity: usize,
    max_message_size: usize,
    slot_size: usize,

    buffer: NonNull<u8>,
    buffer_layout: Layout,
}

// SAFETY: The raw buffer pointer is the only non-Sync field. Slot bytes are
// accessed by exactly one side at a time: the producer writes a slot only
// while it is unpublished (between its claim and the release-store of
// write_cursor), and the consumer reads it only after the acquire-load that
// observed that store and before its own release-store of read_cursor hands
// the slot back. The cursors provide the happens-before edges.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

/// Rounds `value` up to the next multiple of `align` (a power of two).
#[inline]
pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Maps a monotonic cursor to a slot index in `[0, capacity)`.
#[inline]
pub(crate) const fn slot_index(cursor: u64, capacity: usize) -> usize {
    (cursor & (capacity as u64 - 1)) as usize
}

/// Full test from the producer's perspective.
///
/// One slot is always left empty so that full and empty states are
/// distinguishable. `read_cursor` must have been acquire-loaded.
#[inline]
pub(crate) const fn is_full(write_cursor: u64, read_cursor: u64, capacity: usize) -> bool {
    let mask = capacity as u64 - 1;
    ((write_cursor + 1) & mask) == (read_cursor & mask)
}

/// Empty test from the consumer's perspective.
///
/// `write_cursor` must have been acquire-loaded for an exact answer.
#[inline]
pub(crate) const fn is_empty(read_cursor: u64, write_cursor: u64, capacity: usize) -> bool {
    let mask = capacity as u64 - 1;
    (read_cursor & mask) == (write_cursor & mask)
}

/// Free slots from the producer's perspective (approximate under relaxed loads).
#[inline]
pub(crate) const fn free_slots(write_cursor: u64, read_cursor: u64, capacity: usize) -> usize {
    let mask = capacity as u64 - 1;
    let used = (write_cursor.wrapping_sub(read_cursor)) & mask;
    capacity - used as usize - 1
}

/// Resident messages from the consumer's perspective (approximate under relaxed loads).
#[inline]
pub(crate) const fn pending_messages(read_cursor: u64, write_cursor: u64, capacity: usize) -> usize {
    let mask = capacity as u64 - 1;
    ((write_cursor.wrapping_sub(read_cursor)) & mask) as usize
}

impl Ring {
    /// Allocates a zeroed ring for an already-normalized configuration.
    ///
    /// `capacity` must be a power of two in range and `max_message_size` in
    /// range; the broker validates both before calling. Returns `None` when
    /// the buffer size overflows or the allocator fails, leaving nothing to
    /// clean up.
    pub fn allocate(capacity: usize, max_message_size: usize) -> Option<Self> {
        debug_assert!(capacity.is_power_of_two());

        let slot_size = align_up(SIZE_PREFIX_BYTES + max_message_size, 8);
        let buffer_size = capacity.checked_mul(slot_size)?;
        let buffer_layout = Layout::from_size_align(buffer_size, CACHE_LINE).ok()?;

        // SAFETY: buffer_layout has non-zero size (slot_size >= 8, capacity >= 1).
        let raw = unsafe { alloc_zeroed(buffer_layout) };
        let buffer = NonNull::new(raw)?;

        Some(Self {
            write_cursor: Cursor::new(),
            read_cursor: Cursor::new(),
            producer_alive: AliveFlag::new(),
            consumer_alive: AliveFlag::new(),
            write_waiter: Waiter::new(),
            read_waiter: Waiter::new(),
            producer_counters: TransferCounters::default(),
            consumer_counters: TransferCounters::default(),
            capacity,
            max_message_size,
            slot_size,
            buffer,
            buffer_layout,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Raw pointer to the start of the slot addressed by `cursor`.
    ///
    /// # Safety
    ///
    /// The caller must own the slot under the SPSC protocol: the producer may
    /// only take unpublished slots, the consumer only published ones.
    #[inline]
    pub unsafe fn slot_ptr(&self, cursor: u64) -> *mut u8 {
        let index = slot_index(cursor, self.capacity);
        // SAFETY: index < capacity, so the offset stays inside the buffer.
        unsafe { self.buffer.as_ptr().add(index * self.slot_size) }
    }

    /// Raw pointer to the payload region (past the length prefix) of a slot.
    ///
    /// # Safety
    ///
    /// Same ownership requirement as [`Ring::slot_ptr`].
    #[inline]
    pub unsafe fn payload_ptr(&self, cursor: u64) -> *mut u8 {
        // SAFETY: slot_size >= SIZE_PREFIX_BYTES + max_message_size.
        unsafe { self.slot_ptr(cursor).add(SIZE_PREFIX_BYTES) }
    }

    /// Writes the little-endian length prefix of the slot at `cursor`.
    ///
    /// # Safety
    ///
    /// The slot must be owned by the producer and unpublished.
    #[inline]
    pub unsafe fn write_size_prefix(&self, cursor: u64, len: usize) {
        let prefix = (len as u32).to_le_bytes();
        // SAFETY: the first four slot bytes are always in bounds.
        unsafe {
            std::ptr::copy_nonoverlapping(prefix.as_ptr(), self.slot_ptr(cursor), SIZE_PREFIX_BYTES);
        }
    }

    /// Reads the little-endian length prefix of the slot at `cursor`.
    ///
    /// # Safety
    ///
    /// The slot must be published and not yet released by the consumer.
    #[inline]
    pub unsafe fn read_size_prefix(&self, cursor: u64) -> usize {
        let mut prefix = [0u8; SIZE_PREFIX_BYTES];
        // SAFETY: the first four slot bytes are always in bounds.
        unsafe {
            std::ptr::copy_nonoverlapping(self.slot_ptr(cursor), prefix.as_mut_ptr(), SIZE_PREFIX_BYTES);
        }
        u32::from_le_bytes(prefix) as usize
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        // SAFETY: buffer was produced by alloc_zeroed with buffer_layout and
        // is freed exactly once, here.
        unsafe { dealloc(self.buffer.as_ptr(), self.buffer_layout) };
    }
}
