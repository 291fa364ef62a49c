// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Exclusive mutex with a scoped RAII guard. See [`Mutex`] and
//! [`ScopedLock`].

use std::ops::{Deref, DerefMut};

/// Exclusive lock around a value of type `T`.
///
/// Address-stable while any [`ScopedLock`] is live (guards borrow the
/// mutex), non-poisoning, and usable as the anchor of a [`Condition`] wait.
///
/// [`Condition`]: super::Condition
#[derive(Debug, Default)]
pub struct Mutex<T> {
    inner: parking_lot::Mutex<T>,
}

impl<T> Mutex<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            inner: parking_lot::Mutex::new(value),
        }
    }

    /// Acquires the lock, blocking until it is available. Release happens
    /// when the returned guard goes out of scope, on every exit path.
    pub fn lock(&self) -> ScopedLock<'_, T> { ScopedLock(self.inner.lock()) }

    /// Acquires the lock only if it is free right now.
    pub fn try_lock(&self) -> Option<ScopedLock<'_, T>> {
        self.inner.try_lock().map(ScopedLock)
    }

    /// Consumes the mutex, returning the inner value.
    pub fn into_inner(self) -> T { self.inner.into_inner() }
}

/// RAII guard for [`Mutex`]. Locks on construction (via [`Mutex::lock`]),
/// unlocks exactly once on destruction, including during unwind.
pub struct ScopedLock<'a, T>(pub(super) parking_lot::MutexGuard<'a, T>);

impl<T> Deref for ScopedLock<'_, T> {
    type Target = T;

    fn deref(&self) -> &T { &self.0 }
}

impl<T> DerefMut for ScopedLock<'_, T> {
    fn deref_mut(&mut self) -> &mut T { &mut self.0 }
}
