// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll eventfd timerfd mlock mlockall sysfs affinitized

//! Concurrency and event-I/O substrate for Linux services.
//!
//! This crate provides the building blocks a network service needs below the
//! protocol layer:
//!
//! - [`Backoff`]: adaptive pause/yield escalator for short spin sections
//! - [`sync`]: mutex variants, scoped guards, and predicate-waiting conditions
//! - [`Thread`]: joinable execution vehicle with name and stack-size control
//! - [`ThreadPool`] + [`parallel_for_each`]: off-reactor execution for work
//!   that may block or run long
//! - [`CpuTopology`]: sysfs-backed logical CPU / physical core / NUMA view
//! - [`Reactor`] + [`ReactorPool`]: edge-triggered per-thread event
//!   dispatchers, one per physical core, affinitized to each core's primary
//!   thread
//! - [`Timer`]: one-shot or periodic timerfd callback driven by a reactor
//! - [`LocalMem`] / [`ShmMem`]: page-aligned anonymous and POSIX-named shared
//!   memory regions
//! - [`Cache`]: file-content cache revalidated by size and mtime
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ ReactorPool (one Reactor per physical core, round-robin rotor)   │
//! │   Reactor 0 ─ dispatch thread pinned to core 0 primary thread    │
//! │   Reactor 1 ─ dispatch thread pinned to core 1 primary thread    │
//! │   ...                                                            │
//! │                                                                  │
//! │   each Reactor: Poll (epoll, edge-triggered)                     │
//! │                 Waker (eventfd wake channel)                     │
//! │                 handler table (fd → Arc<dyn EventHandler>)       │
//! └──────────────────────────────────────────────────────────────────┘
//!          │ on_receive / on_close / on_error
//!          ▼
//!   EventHandler impls (sockets, timers, wake sources)
//!          │ long-running work
//!          ▼
//!   ThreadPool workers (FIFO job deque, one mutex + condition)
//! ```
//!
//! All callbacks for one reactor run serially on that reactor's dispatch
//! thread; there is no coroutine runtime and no cross-handler work stealing.
//! Handlers that need to block delegate to the [`ThreadPool`].
//!
//! # Error reporting
//!
//! Fallible operations return [`Result`](crate::error::Result) and additionally populate a
//! thread-local [`last_error`] cell, which is how failures inside reactor
//! callbacks (that have no caller to return to) are surfaced. See [`error`].
//!
//! # Platform
//!
//! Linux-like hosts only: epoll, eventfd, timerfd, POSIX shared memory
//! objects, and sysfs CPU topology are assumed to exist.

pub mod backoff;
pub mod cache;
pub mod cpu;
pub mod error;
pub mod mem;
pub mod reactor;
pub mod sync;
pub mod thread;
pub mod thread_pool;
pub mod timer;

pub use backoff::Backoff;
pub use cache::{Cache, FileStat};
pub use cpu::{CpuTopology, LogicalCpu, NumaNode, PhysicalCore};
pub use error::{Error, ErrorKind, Result, last_error, take_last_error};
pub use mem::{LocalMem, SharedMemory, ShmMem, lock_all_pages};
pub use reactor::{EventHandler, Reactor, ReactorPool};
pub use sync::{
    Condition, Mutex, RecursiveLock, RecursiveMutex, ScopedLock, SharedCondition, SharedMutex,
    SharedReadLock, SharedWriteLock,
};
pub use thread::Thread;
pub use thread_pool::{ThreadPool, parallel_for_each};
pub use timer::Timer;
