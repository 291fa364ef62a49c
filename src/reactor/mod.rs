// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll eventfd affinitized

//! Edge-triggered event dispatch: one [`Reactor`] per dispatch thread, one
//! [`ReactorPool`] per process.
//!
//! # Architecture Overview
//!
//! ```text
//! admin threads                         dispatch thread (owns mio::Poll)
//! ─────────────                         ────────────────────────────────
//! add_handler(h, sync) ──┐
//!   register fd          │  wake token      ┌─► poll() blocks on epoll
//!   insert table entry   ├─────────────────►│
//!   wait for epoch ack ◄─┼──────────────────┤   per ready fd:
//!                        │                  │     hang-up → on_close
//! del_handler(h, sync) ──┘                  │     error   → on_error
//!   remove table entry                      │     else    → on_receive
//!   deregister fd                           │
//!                                           └─► acknowledge admin epoch
//! ```
//!
//! The [`Poll`] moves to the dispatch thread at spawn; admin threads keep a
//! cloned [`Registry`] plus a [`Waker`] (a counting eventfd on Linux). Every
//! administrative request bumps an epoch and posts a wake token; the
//! dispatcher acknowledges epochs only **between** dispatch batches, never
//! mid-callback. That one rule gives the whole synchronous contract:
//!
//! - `add_handler(h, sync = true)` returns only after the dispatcher has
//!   observed the insertion, so it happens-before the first callback on `h`.
//! - `del_handler(h, sync = true)` returns only after any in-flight callback
//!   on `h` has completed, and the table entry is already gone, so no
//!   further callback can start.
//!
//! Callbacks for one handler never overlap: a reactor has exactly one
//! dispatch thread. A callback that panics is caught, recorded in the
//! thread-local error slot, and the loop keeps dispatching.
//!
//! [`ReactorPool`] is the scaling story: one reactor per physical core, each
//! dispatch thread affinitized to its core's primary SMT thread, handlers
//! placed by an atomic round-robin rotor. The common path shares no lock
//! across cores.
//!
//! [`Poll`]: mio::Poll
//! [`Registry`]: mio::Registry
//! [`Waker`]: mio::Waker

mod dispatcher;
mod event_handler;
mod reactor_pool;

pub use dispatcher::*;
pub use event_handler::*;
pub use reactor_pool::*;
