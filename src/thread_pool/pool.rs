// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The worker pool itself. See [`ThreadPool`].

use crate::{
    error::{Error, ErrorKind, Result, track},
    sync::{Condition, Mutex},
    thread::Thread,
};
use std::{collections::VecDeque, sync::Arc};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Queue state shared between producers and workers, guarded by one mutex.
#[derive(Default)]
struct PoolState {
    jobs: VecDeque<Job>,
    stop: bool,
}

/// Shared side of the pool: the guarded deque plus the condition workers
/// sleep on.
#[derive(Default)]
struct PoolShared {
    state: Mutex<PoolState>,
    condition: Condition,
}

/// Fixed-size pool draining a FIFO job deque.
///
/// Every worker runs the same loop: wait on the condition while the deque is
/// empty and the pool is live, pop one job from the front, run it **outside**
/// the lock, repeat. Jobs pushed by a single producer therefore start in
/// push order; nothing is guaranteed across producers.
///
/// Dropping the pool is a cooperative shutdown: the stop flag is set, all
/// workers are woken, and each drains what remains of the deque before
/// exiting. Every job pushed before the drop runs exactly once; no running
/// job is interrupted.
///
/// # Example
///
/// ```
/// use r3bl_reactor::ThreadPool;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let counter = Arc::new(AtomicUsize::new(0));
/// {
///     let pool = ThreadPool::new(4).unwrap();
///     for _ in 0..8 {
///         let counter = Arc::clone(&counter);
///         pool.push(move || {
///             counter.fetch_add(1, Ordering::SeqCst);
///         });
///     }
/// } // drop waits for all 8 jobs
/// assert_eq!(counter.load(Ordering::SeqCst), 8);
/// ```
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<Worker>,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl ThreadPool {
    /// Creates a pool with `workers` threads. Fails with
    /// [`ErrorKind::InvalidParam`] when `workers` is zero.
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return track(Err(Error::new(
                ErrorKind::InvalidParam,
                "worker count is zero",
            )));
        }
        let shared = Arc::new(PoolShared::default());
        let workers = (0..workers)
            .map(|index| Worker::spawn(index, Arc::clone(&shared)))
            .collect::<Result<Vec<_>>>()?;
        track(Ok(Self { shared, workers }))
    }

    /// Number of worker threads.
    #[must_use]
    pub fn size(&self) -> usize { self.workers.len() }

    /// Appends a job to the back of the deque and wakes one worker.
    pub fn push(&self, job: impl FnOnce() + Send + 'static) {
        let mut state = self.shared.state.lock();
        state.jobs.push_back(Box::new(job));
        self.shared.condition.signal();
    }
}

impl Default for ThreadPool {
    /// Sizes the pool to the host's hardware concurrency plus one, so there
    /// is a runnable worker even while one sits in a blocking syscall.
    fn default() -> Self {
        // num_cpus::get() >= 1, so this cannot hit the zero-size error.
        Self::new(num_cpus::get() + 1).expect("default-sized pool")
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stop = true;
        }
        self.shared.condition.broadcast();
        // Each worker's Thread joins on drop.
        self.workers.clear();
    }
}

/// One pool thread. Spawning and the drain loop live here; the pool only
/// holds the vehicle for joining.
struct Worker {
    _thread: Thread,
}

impl Worker {
    fn spawn(index: usize, shared: Arc<PoolShared>) -> Result<Self> {
        let thread = Thread::builder()
            .name(format!("pool-worker-{index}"))
            .spawn(move || Self::drain(&shared))?;
        Ok(Self { _thread: thread })
    }

    /// Worker loop: one pop per wake, job invoked with the lock released.
    fn drain(shared: &PoolShared) {
        loop {
            let job = {
                let mut state = shared.state.lock();
                shared
                    .condition
                    .wait(&mut state, |s| s.stop || !s.jobs.is_empty());
                match state.jobs.pop_front() {
                    Some(job) => job,
                    // Deque fully drained and the pool is shutting down.
                    None => return,
                }
            };
            job();
        }
    }
}
