// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Reentrant mutex. See [`RecursiveMutex`].

use std::ops::Deref;

/// Mutex that the owning thread may relock without deadlocking.
///
/// Guards hand out shared access only: a second [`lock`] on the owning
/// thread would otherwise mint two `&mut T` to the same value. Interior
/// mutability ([`Cell`], [`RefCell`], atomics) restores mutation where it is
/// needed.
///
/// [`Cell`]: std::cell::Cell
/// [`RefCell`]: std::cell::RefCell
/// [`lock`]: Self::lock
#[derive(Debug, Default)]
pub struct RecursiveMutex<T> {
    inner: parking_lot::ReentrantMutex<T>,
}

impl<T> RecursiveMutex<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            inner: parking_lot::ReentrantMutex::new(value),
        }
    }

    /// Acquires the lock; succeeds immediately when the current thread
    /// already owns it.
    pub fn lock(&self) -> RecursiveLock<'_, T> { RecursiveLock(self.inner.lock()) }

    /// Acquires the lock only if it is free or already owned by the current
    /// thread.
    pub fn try_lock(&self) -> Option<RecursiveLock<'_, T>> {
        self.inner.try_lock().map(RecursiveLock)
    }
}

/// RAII guard for [`RecursiveMutex`]; each guard releases one level of the
/// recursive acquisition.
pub struct RecursiveLock<'a, T>(parking_lot::ReentrantMutexGuard<'a, T>);

impl<T> Deref for RecursiveLock<'_, T> {
    type Target = T;

    fn deref(&self) -> &T { &self.0 }
}
