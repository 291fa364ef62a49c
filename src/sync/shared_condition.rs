// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Predicate-waiting condition paired with [`SharedMutex`]. See
//! [`SharedCondition`].

use super::SharedWriteLock;
use std::time::{Duration, Instant};

/// Condition variable for waiters holding a [`SharedWriteLock`].
///
/// OS condition variables only pair with a plain mutex, so waiting under a
/// reader/writer lock needs a handoff through an internal *gate* mutex. The
/// ordering is what makes it correct:
///
/// ```text
/// waiter:   [hold write lock] → acquire gate → release write lock
///           → park on condvar (atomically releases gate)
///           → wake (gate re-held) → release gate → re-acquire write lock
///           → re-check predicate
///
/// signaler: [hold write lock, mutate state] → acquire gate → notify
///           → release gate
/// ```
///
/// - **No lost wakeup**: the waiter still owns the gate from before it gave
///   up the write lock until it is parked, and a signal cannot be delivered
///   without the gate. Any signal that follows the waiter's predicate check
///   therefore waits until the waiter is parked.
/// - **No deadlock**: the waiter never blocks on the write lock while
///   holding the gate (the gate is dropped first), so a signaler holding the
///   write lock can always reach the gate.
///
/// Spurious wakes are absorbed by the predicate re-check, same as
/// [`Condition`].
///
/// [`Condition`]: super::Condition
/// [`SharedMutex`]: super::SharedMutex
#[derive(Debug, Default)]
pub struct SharedCondition {
    gate: parking_lot::Mutex<()>,
    condvar: parking_lot::Condvar,
}

impl SharedCondition {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            gate: parking_lot::Mutex::new(()),
            condvar: parking_lot::Condvar::new(),
        }
    }

    /// Blocks until `predicate` returns true. The write lock is released
    /// while parked and re-held for every predicate check.
    pub fn wait<T>(
        &self,
        guard: &mut SharedWriteLock<'_, T>,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) {
        while !predicate(&mut *guard) {
            let mut gate = self.gate.lock();
            parking_lot::RwLockWriteGuard::unlocked(&mut guard.0, || {
                self.condvar.wait(&mut gate);
                // Gate must drop before the write lock is re-acquired, or a
                // signaler holding the write lock could never reach it.
                drop(gate);
            });
        }
    }

    /// Like [`wait`], but gives up once `timeout` has elapsed on the
    /// monotonic clock. Returns true iff the predicate became true before
    /// the deadline.
    ///
    /// [`wait`]: Self::wait
    pub fn wait_for<T>(
        &self,
        guard: &mut SharedWriteLock<'_, T>,
        timeout: Duration,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        while !predicate(&mut *guard) {
            let mut timed_out = false;
            let mut gate = self.gate.lock();
            parking_lot::RwLockWriteGuard::unlocked(&mut guard.0, || {
                timed_out = self.condvar.wait_until(&mut gate, deadline).timed_out();
                drop(gate);
            });
            if timed_out {
                return predicate(&mut *guard);
            }
        }
        true
    }

    /// Wakes one waiter.
    pub fn signal(&self) {
        let _gate = self.gate.lock();
        self.condvar.notify_one();
    }

    /// Wakes all waiters.
    pub fn broadcast(&self) {
        let _gate = self.gate.lock();
        self.condvar.notify_all();
    }
}
