// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! One-shot parallel iteration. See [`parallel_for_each`].

use super::ThreadPool;
use std::sync::Arc;

/// Applies `func` to every item of `items` on a transient default-sized
/// [`ThreadPool`], returning once every application has completed (the
/// pool's drop is the completion barrier).
///
/// Items are moved into their jobs; `func` is shared across workers.
///
/// # Example
///
/// ```
/// use r3bl_reactor::parallel_for_each;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// let total = Arc::new(AtomicU32::new(0));
/// let seen = Arc::clone(&total);
/// parallel_for_each(vec![1_u32, 2, 3, 4, 5], move |n| {
///     seen.fetch_add(n, Ordering::SeqCst);
/// });
/// assert_eq!(total.load(Ordering::SeqCst), 15);
/// ```
pub fn parallel_for_each<I, F>(items: I, func: F)
where
    I: IntoIterator,
    I::Item: Send + 'static,
    F: Fn(I::Item) + Send + Sync + 'static,
{
    let pool = ThreadPool::default();
    let func = Arc::new(func);
    for item in items {
        let func = Arc::clone(&func);
        pool.push(move || func(item));
    }
    // Pool drop joins the workers after the deque drains.
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::{Duration, Instant},
    };

    #[test]
    fn applies_func_to_every_item() {
        let total = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&total);
        parallel_for_each(vec![1_usize, 2, 3, 4, 5], move |n| {
            seen.fetch_add(n, Ordering::SeqCst);
        });
        assert_eq!(total.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn items_run_in_parallel() {
        // Five 20 ms sleeps serially would cost 100 ms; in parallel the
        // whole batch still costs at least one sleep.
        let begin = Instant::now();
        parallel_for_each(vec![(); 5], |()| {
            std::thread::sleep(Duration::from_millis(20));
        });
        let elapsed = begin.elapsed();
        assert!(elapsed >= Duration::from_millis(20));
        assert!(elapsed < Duration::from_millis(100));
    }

    #[test]
    fn empty_input_is_a_no_op() {
        parallel_for_each(Vec::<u8>::new(), |_| unreachable!("no items"));
    }
}
