// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Predicate-waiting condition paired with [`Mutex`]. See [`Condition`].
//!
//! [`Mutex`]: super::Mutex

use super::ScopedLock;
use std::time::{Duration, Instant};

/// Condition variable bound to a predicate-wait protocol.
///
/// The caller must hold the paired [`Mutex`](super::Mutex) (as a
/// [`ScopedLock`]) when waiting or signalling. Spurious wakes are absorbed by re-checking the
/// predicate on every wake; the predicate is only ever evaluated with the
/// lock held.
///
/// Timed waits measure against the monotonic clock, so wall-clock jumps
/// (NTP, suspend/resume) cannot shorten or extend a deadline.
///
/// # Example
///
/// ```
/// use r3bl_reactor::sync::{Condition, Mutex};
/// use std::time::Duration;
///
/// let ready = Mutex::new(false);
/// let condition = Condition::new();
///
/// // Consumer side (usually another thread):
/// let mut guard = ready.lock();
/// let became_ready = condition.wait_for(&mut guard, Duration::from_millis(1), |ready| *ready);
/// assert!(!became_ready); // nobody signalled
/// ```
#[derive(Debug, Default)]
pub struct Condition {
    condvar: parking_lot::Condvar,
}

impl Condition {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            condvar: parking_lot::Condvar::new(),
        }
    }

    /// Blocks until `predicate` returns true, releasing the lock while
    /// parked and re-acquiring it before each predicate check.
    pub fn wait<T>(&self, guard: &mut ScopedLock<'_, T>, mut predicate: impl FnMut(&mut T) -> bool) {
        while !predicate(&mut *guard) {
            self.condvar.wait(&mut guard.0);
        }
    }

    /// Like [`wait`], but gives up once `timeout` has elapsed on the
    /// monotonic clock. Returns true iff the predicate became true before
    /// the deadline.
    ///
    /// [`wait`]: Self::wait
    pub fn wait_for<T>(
        &self,
        guard: &mut ScopedLock<'_, T>,
        timeout: Duration,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        while !predicate(&mut *guard) {
            if self.condvar.wait_until(&mut guard.0, deadline).timed_out() {
                // One final check: the predicate may have flipped between
                // the last wake and the deadline.
                return predicate(&mut *guard);
            }
        }
        true
    }

    /// Wakes one waiter.
    pub fn signal(&self) { self.condvar.notify_one(); }

    /// Wakes all waiters.
    pub fn broadcast(&self) { self.condvar.notify_all(); }
}
