//! Wait strategies for blocking channel operations.
//!
//! Two mechanisms, chosen by the caller's timeout:
//!
//! - [`spin_wait`]: a bounded busy loop for finite deadlines. Spins for
//!   roughly 1-2us to absorb short contention, then yields the scheduler
//!   once. The caller re-checks its steady-clock deadline in the outer loop.
//! - [`Waiter`]: a per-cursor sleep/wake primitive for infinite waits,
//!   emulating atomic wait/notify with a mutex and condvar. `wait` suspends
//!   only while the cursor still holds the expected value and returns on any
//!   change, notification, or spurious wakeup; callers must re-evaluate
//!   their predicate after every return.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering, fence};
use std::sync::{Condvar, Mutex};

/// Spin iterations before yielding. Each iteration is two atomic loads and a
/// predicate check, so this is roughly 1-2us on current hardware.
const SPIN_ITERATIONS: usize = 1000;

/// Spins until `ready` returns true or the budget runs out, then yields once.
///
/// Returns as soon as the predicate holds; the caller retries its operation
/// either way. The predicate owns the memory ordering of its loads
/// (typically acquire for the peer cursor, relaxed for the own one).
#[inline]
pub(crate) fn spin_wait<F: FnMut() -> bool>(mut ready: F) {
    for _ in 0..SPIN_ITERATIONS {
        if ready() {
            return;
        }
        std::hint::spin_loop();
    }
    std::thread::yield_now();
}

/// Sleep/wake coordination point for one cursor.
///
/// The futex-style contract: a sleeper is only parked while the cursor value
/// equals the expected one, and a notifier that changed the value (or wants
/// to force a re-check, e.g. on handle drop) always wakes it. The waiter
/// count lets the notify path skip the lock entirely when nobody sleeps,
/// which is the common case.
pub(crate) struct Waiter {
    lock: Mutex<()>,
    cond: Condvar,
    waiters: AtomicUsize,
    #[cfg(test)]
    pub(crate) notifications: AtomicU64,
}

impl Waiter {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cond: Condvar::new(),
            waiters: AtomicUsize::new(0),
            #[cfg(test)]
            notifications: AtomicU64::new(0),
        }
    }

    /// Blocks while `cursor` still reads `expected`.
    ///
    /// May also return spuriously; the caller loops and re-checks.
    pub fn wait(&self, cursor: &AtomicU64, expected: u64) {
        self.waiters.fetch_add(1, Ordering::Relaxed);
        // Pairs with the fence in notify_one: after this fence, either the
        // notifier sees our increment or we see its cursor store.
        fence(Ordering::SeqCst);

        let guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if cursor.load(Ordering::Acquire) == expected {
            drop(self.cond.wait(guard));
        } else {
            drop(guard);
        }

        self.waiters.fetch_sub(1, Ordering::Relaxed);
    }

    /// Wakes a blocked peer, if any.
    ///
    /// Must be called after the publishing release-store (or liveness-flag
    /// store) so a woken sleeper observes the new state. Without the fence a
    /// sleeper that registered concurrently could be missed: its increment
    /// and our cursor store would be allowed to pass each other.
    pub fn notify_one(&self) {
        #[cfg(test)]
        self.notifications.fetch_add(1, Ordering::Relaxed);

        fence(Ordering::SeqCst);
        if self.waiters.load(Ordering::Relaxed) == 0 {
            return;
        }
        // Taking the lock serializes with a sleeper that passed its check
        // but has not parked yet; notify_all covers spurious multi-sleepers.
        let guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        drop(guard);
        self.cond.notify_all();
    }
}
