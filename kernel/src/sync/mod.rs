//! Synchronization primitives
//!
//! Spinlocks come from the `spin` crate. The one primitive built here is a
//! small condition variable for the parent/child exit rendezvous: Mesa
//! semantics, no queue, wake-ups detected through a generation counter so a
//! notification between the predicate check and the wait cannot be lost as
//! long as the notifier flips state under the same mutex.

use core::sync::atomic::{AtomicU32, Ordering};

use spin::{Mutex, MutexGuard};

/// Condition variable usable with a [`spin::Mutex`].
pub struct Condvar {
    generation: AtomicU32,
}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            generation: AtomicU32::new(0),
        }
    }

    /// Atomically release `guard` and wait for a notification, then
    /// re-acquire the lock.
    ///
    /// Spurious wake-ups are possible; callers loop on their predicate.
    pub fn wait<'a, T>(&self, lock: &'a Mutex<T>, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let observed = self.generation.load(Ordering::Acquire);
        drop(guard);
        while self.generation.load(Ordering::Acquire) == observed {
            relax();
        }
        lock.lock()
    }

    /// Wake every waiter.
    pub fn notify_all(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

fn relax() {
    #[cfg(not(target_os = "none"))]
    std::thread::yield_now();
    #[cfg(target_os = "none")]
    core::hint::spin_loop();
}
