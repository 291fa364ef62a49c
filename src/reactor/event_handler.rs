// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The capability interface a [`Reactor`] dispatches to. See
//! [`EventHandler`].
//!
//! [`Reactor`]: super::Reactor

use std::os::fd::RawFd;

/// A readiness-driven event sink tied to one native handle.
///
/// Implementors cover raw sockets, timers, and wake sources alike: anything
/// with a pollable file descriptor. The reactor watches the handle for
/// readable readiness in edge-triggered mode with hang-up and error
/// reporting, and calls back accordingly.
///
/// # Callback context
///
/// All three callbacks run on the owning reactor's dispatch thread, never
/// concurrently with each other for the same handler within one reactor.
/// They must not block for long; work that might should be pushed to a
/// [`ThreadPool`]. Registering one handler with two reactors at once is the
/// caller's mistake (callbacks would overlap) and is rejected by
/// [`ReactorPool`]'s placement map.
///
/// # Edge-triggered obligation
///
/// Readiness is reported once per edge: `on_receive` must drain its handle
/// (read until `EAGAIN`) or it will not be called again for data that was
/// already readable.
///
/// [`ReactorPool`]: super::ReactorPool
/// [`ThreadPool`]: crate::thread_pool::ThreadPool
pub trait EventHandler: Send + Sync {
    /// The native handle the reactor watches. Must stay valid while the
    /// handler is registered.
    fn handle(&self) -> RawFd;

    /// Data is ready to be read on the handle.
    fn on_receive(&self);

    /// The peer hung up on the handle.
    fn on_close(&self) { /* do nothing */ }

    /// An error condition was reported on the handle.
    fn on_error(&self) { /* do nothing */ }
}
