// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Reader/writer mutex. See [`SharedMutex`].

use std::ops::{Deref, DerefMut};

/// Lock distinguishing shared (read) from exclusive (write) acquisition.
///
/// Any number of [`SharedReadLock`]s may be live at once; a
/// [`SharedWriteLock`] excludes everything else. Pairs with
/// [`SharedCondition`] for predicate waits under the write lock.
///
/// [`SharedCondition`]: super::SharedCondition
#[derive(Debug, Default)]
pub struct SharedMutex<T> {
    inner: parking_lot::RwLock<T>,
}

impl<T> SharedMutex<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            inner: parking_lot::RwLock::new(value),
        }
    }

    /// Acquires shared access, blocking while a writer is active.
    pub fn read(&self) -> SharedReadLock<'_, T> { SharedReadLock(self.inner.read()) }

    /// Acquires exclusive access, blocking while any reader or writer is
    /// active.
    pub fn write(&self) -> SharedWriteLock<'_, T> { SharedWriteLock(self.inner.write()) }

    pub fn try_read(&self) -> Option<SharedReadLock<'_, T>> {
        self.inner.try_read().map(SharedReadLock)
    }

    pub fn try_write(&self) -> Option<SharedWriteLock<'_, T>> {
        self.inner.try_write().map(SharedWriteLock)
    }
}

/// Shared RAII guard for [`SharedMutex`].
pub struct SharedReadLock<'a, T>(parking_lot::RwLockReadGuard<'a, T>);

impl<T> Deref for SharedReadLock<'_, T> {
    type Target = T;

    fn deref(&self) -> &T { &self.0 }
}

/// Exclusive RAII guard for [`SharedMutex`].
pub struct SharedWriteLock<'a, T>(pub(super) parking_lot::RwLockWriteGuard<'a, T>);

impl<T> Deref for SharedWriteLock<'_, T> {
    type Target = T;

    fn deref(&self) -> &T { &self.0 }
}

impl<T> DerefMut for SharedWriteLock<'_, T> {
    fn deref_mut(&mut self) -> &mut T { &mut self.0 }
}
