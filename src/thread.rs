// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Joinable execution vehicle. See [`Thread`].

use crate::error::{Error, ErrorKind, Result, track};

/// An OS thread that invokes its closure exactly once and joins on drop.
///
/// [`std::thread::spawn`] detaches when the [`JoinHandle`] is dropped; the
/// components in this crate (pool workers, reactor dispatchers) must never
/// outlive their owner, so this wrapper joins instead. Name and stack size
/// are settable through [`builder`], which is the reason the type exists at
/// all.
///
/// A panic inside the closure is a programming error; it surfaces as
/// [`ErrorKind::OperationFailed`] from [`join`], or as a `tracing::error!`
/// when the join happens implicitly on drop.
///
/// [`JoinHandle`]: std::thread::JoinHandle
/// [`builder`]: Self::builder
/// [`join`]: Self::join
#[derive(Debug)]
pub struct Thread {
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Thread {
    /// Spawns a thread with default attributes.
    pub fn spawn(f: impl FnOnce() + Send + 'static) -> Result<Self> {
        Self::builder().spawn(f)
    }

    /// Starts configuring a thread (name, stack size).
    #[must_use]
    pub fn builder() -> ThreadBuilder { ThreadBuilder::default() }

    /// Whether the underlying thread has finished running its closure.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(std::thread::JoinHandle::is_finished)
    }

    /// Blocks until the thread exits. Idempotent; reports a closure panic as
    /// [`ErrorKind::OperationFailed`].
    pub fn join(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        track(handle.join().map_err(|_| {
            Error::new(ErrorKind::OperationFailed, "thread closure panicked")
        }))
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if let Err(error) = self.join() {
            tracing::error!("joining thread on drop: {error}");
        }
    }
}

/// Attribute builder for [`Thread`].
#[derive(Debug, Default)]
pub struct ThreadBuilder {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl ThreadBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Spawns the thread. Fails with [`ErrorKind::OperationFailed`] (or the
    /// mapped OS kind) when the host refuses to create a thread.
    ///
    /// [`ErrorKind::OperationFailed`]: crate::error::ErrorKind::OperationFailed
    pub fn spawn(self, f: impl FnOnce() + Send + 'static) -> Result<Thread> {
        let mut builder = std::thread::Builder::new();
        if let Some(name) = self.name {
            builder = builder.name(name);
        }
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }
        track(
            builder
                .spawn(f)
                .map(|handle| Thread {
                    handle: Some(handle),
                })
                .map_err(Error::from),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    #[test]
    fn closure_runs_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let mut thread = Thread::spawn(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        thread.join().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_joins_the_thread() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        drop(
            Thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(5));
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap(),
        );
        // Drop returned, so the closure must have completed.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn named_thread_carries_its_name() {
        let mut thread = Thread::builder()
            .name("vehicle-test")
            .spawn(|| {
                assert_eq!(std::thread::current().name(), Some("vehicle-test"));
            })
            .unwrap();
        thread.join().unwrap();
    }

    #[test]
    fn join_reports_closure_panic() {
        let mut thread = Thread::spawn(|| panic!("deliberate")).unwrap();
        let error = thread.join().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::OperationFailed);
        // Second join is a no-op.
        assert!(thread.join().is_ok());
    }
}
