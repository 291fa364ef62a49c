// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Lock primitives and predicate-waiting conditions.
//!
//! Three lock flavors, each with an RAII guard that releases exactly once on
//! every exit path, and two condition types for predicate waits with
//! monotonic timed variants:
//!
//! | Lock                | Guard(s)                                 | Paired condition    |
//! | :------------------ | :--------------------------------------- | :------------------ |
//! | [`Mutex`]           | [`ScopedLock`]                           | [`Condition`]       |
//! | [`RecursiveMutex`]  | [`RecursiveLock`]                        | none                |
//! | [`SharedMutex`]     | [`SharedReadLock`], [`SharedWriteLock`]  | [`SharedCondition`] |
//!
//! None of the locks poison: a panic while a guard is live simply releases
//! the lock on unwind. This keeps `lock` infallible, which is the contract
//! the rest of the crate is written against. All timed waits measure against
//! the monotonic clock ([`std::time::Instant`]), never wall time.

mod condition;
mod mutex;
mod recursive_mutex;
mod shared_condition;
mod shared_mutex;

pub use condition::*;
pub use mutex::*;
pub use recursive_mutex::*;
pub use shared_condition::*;
pub use shared_mutex::*;
