// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words timerfd Itimerspec

//! One-shot and periodic callbacks driven by a reactor. See [`Timer`].

use crate::{
    error::{Error, ErrorKind, Result, record_error, track},
    reactor::{EventHandler, ReactorPool},
    sync::Mutex,
};
use rustix::time::{
    Itimerspec, TimerfdClockId, TimerfdFlags, TimerfdTimerFlags, Timespec, timerfd_create,
    timerfd_settime,
};
use std::{
    os::fd::{AsRawFd, OwnedFd, RawFd},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

type TimerCallback = Box<dyn FnMut() + Send>;

/// The shared side of a timer: the descriptor, the armed shape, and the
/// callback. Registered with a reactor as an [`EventHandler`].
struct TimerCore {
    fd: OwnedFd,
    interval_nanos: AtomicU64,
    one_shot: AtomicBool,
    active: AtomicBool,
    callback: Mutex<Option<TimerCallback>>,
}

impl TimerCore {
    /// Reverts to the default shape: inactive, one-shot, zero interval.
    fn reset_shape(&self) {
        self.interval_nanos.store(0, Ordering::Release);
        self.one_shot.store(true, Ordering::Release);
        self.active.store(false, Ordering::Release);
    }
}

impl EventHandler for TimerCore {
    fn handle(&self) -> RawFd { self.fd.as_raw_fd() }

    fn on_receive(&self) {
        // Drain the expiration counter: however many intervals elapsed since
        // the last dispatch, the callback runs once (missed ticks coalesce).
        let mut expirations = [0_u8; 8];
        match rustix::io::read(&self.fd, &mut expirations[..]) {
            Ok(_) => {}
            Err(rustix::io::Errno::AGAIN) => return,
            Err(errno) => {
                record_error(errno.into());
                tracing::warn!("reading timer descriptor: {errno}");
                return;
            }
        }
        if self.one_shot.load(Ordering::Acquire) {
            // The descriptor already disarmed itself; revert the shape and
            // leave the reactor. Async delete: this is the dispatch thread.
            self.reset_shape();
            if let Ok(pool) = ReactorPool::instance() {
                let _ = pool.del_handler(self, false);
            }
        }
        if let Some(callback) = self.callback.lock().as_mut() {
            callback();
        }
    }
}

/// A one-shot or periodic callback driven by a kernel timer registered with
/// a [`Reactor`] from the pool.
///
/// The callback executes on the owning reactor's dispatch thread;
/// long-running callbacks should delegate to a [`ThreadPool`]. On a periodic
/// timer, missed ticks are coalesced: the callback runs once per dispatch
/// regardless of how many intervals elapsed.
///
/// The default shape (also restored by [`cancel`] and after a one-shot
/// fires) is: inactive, one-shot, zero interval.
///
/// # Example
///
/// ```no_run
/// use r3bl_reactor::Timer;
/// use std::time::Duration;
///
/// let mut timer = Timer::new().unwrap();
/// timer.set_interval(Duration::from_millis(250), || {
///     tracing::debug!("housekeeping tick");
/// }).unwrap();
/// // ... later:
/// timer.cancel().unwrap();
/// assert!(!timer.is_active());
/// ```
///
/// [`Reactor`]: crate::reactor::Reactor
/// [`ThreadPool`]: crate::thread_pool::ThreadPool
/// [`cancel`]: Self::cancel
pub struct Timer {
    core: Arc<TimerCore>,
}

impl Timer {
    /// Creates an inactive timer owning a fresh monotonic timer descriptor.
    pub fn new() -> Result<Self> {
        let fd = track(
            timerfd_create(
                TimerfdClockId::Monotonic,
                TimerfdFlags::NONBLOCK | TimerfdFlags::CLOEXEC,
            )
            .map_err(Error::from),
        )?;
        Ok(Self {
            core: Arc::new(TimerCore {
                fd,
                interval_nanos: AtomicU64::new(0),
                one_shot: AtomicBool::new(true),
                active: AtomicBool::new(false),
                callback: Mutex::new(None),
            }),
        })
    }

    /// Arms the timer to invoke `callback` once, `delay` from now.
    pub fn set_one_shot(
        &mut self,
        delay: Duration,
        callback: impl FnMut() + Send + 'static,
    ) -> Result<()> {
        track(self.arm(delay, true, Box::new(callback)))
    }

    /// Arms the timer to invoke `callback` every `period`, first firing one
    /// `period` from now.
    pub fn set_interval(
        &mut self,
        period: Duration,
        callback: impl FnMut() + Send + 'static,
    ) -> Result<()> {
        track(self.arm(period, false, Box::new(callback)))
    }

    fn arm(&mut self, period: Duration, one_shot: bool, callback: TimerCallback) -> Result<()> {
        if period.is_zero() {
            // Zero interval means "inactive"; arming with it is a contract
            // violation, not a disarm.
            return Err(Error::new(ErrorKind::InvalidParam, "timer duration is zero"));
        }
        let nanos = u64::try_from(period.as_nanos())
            .map_err(|_| Error::new(ErrorKind::InvalidParam, "timer duration overflows"))?;
        if self.core.active.load(Ordering::Acquire) {
            self.cancel()?;
        }

        *self.core.callback.lock() = Some(callback);
        self.core.interval_nanos.store(nanos, Ordering::Release);
        self.core.one_shot.store(one_shot, Ordering::Release);
        self.core.active.store(true, Ordering::Release);

        // Register before arming so an immediate expiry cannot slip past the
        // multiplexer.
        if let Err(error) = ReactorPool::instance()
            .and_then(|pool| pool.add_handler(Arc::clone(&self.core) as _, true))
        {
            self.core.reset_shape();
            *self.core.callback.lock() = None;
            return Err(error);
        }
        let armed = timespec_from(period);
        let spec = Itimerspec {
            it_interval: if one_shot {
                timespec_from(Duration::ZERO)
            } else {
                armed
            },
            it_value: armed,
        };
        if let Err(errno) = timerfd_settime(&self.core.fd, TimerfdTimerFlags::empty(), &spec) {
            let _ = ReactorPool::instance().and_then(|pool| pool.del_handler(&*self.core, true));
            self.core.reset_shape();
            *self.core.callback.lock() = None;
            return Err(errno.into());
        }
        Ok(())
    }

    /// Disarms the timer. On return the callback is guaranteed not to start
    /// subsequently, and the shape reverts to the default. A no-op on an
    /// inactive timer.
    pub fn cancel(&mut self) -> Result<()> {
        if !self.core.active.swap(false, Ordering::AcqRel) {
            self.core.reset_shape();
            return track(Ok(()));
        }
        let disarmed = Itimerspec {
            it_interval: timespec_from(Duration::ZERO),
            it_value: timespec_from(Duration::ZERO),
        };
        timerfd_settime(&self.core.fd, TimerfdTimerFlags::empty(), &disarmed)
            .map_err(Error::from)?;
        if let Ok(pool) = ReactorPool::instance() {
            match pool.del_handler(&*self.core, true) {
                Ok(()) => {}
                // A firing one-shot deregisters itself; losing that race to
                // the dispatch thread is fine.
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => return track(Err(error)),
            }
        }
        self.core.reset_shape();
        *self.core.callback.lock() = None;
        track(Ok(()))
    }

    /// The armed period; zero while inactive.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.core.interval_nanos.load(Ordering::Acquire))
    }

    /// Whether the timer is currently armed.
    #[must_use]
    pub fn is_active(&self) -> bool { self.core.active.load(Ordering::Acquire) }

    /// Whether the timer is shaped one-shot (true while disarmed: the
    /// default shape).
    #[must_use]
    pub fn is_one_shot(&self) -> bool { self.core.one_shot.load(Ordering::Acquire) }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Err(error) = self.cancel() {
            tracing::warn!("cancelling timer on drop: {error}");
        }
    }
}

fn timespec_from(duration: Duration) -> Timespec {
    Timespec {
        tv_sec: duration.as_secs() as i64,
        tv_nsec: i64::from(duration.subsec_nanos()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::sync::atomic::AtomicUsize;

    fn sleep_ms(ms: u64) { std::thread::sleep(Duration::from_millis(ms)); }

    #[test]
    #[serial]
    fn default_shape_is_inactive_one_shot_zero() {
        let timer = Timer::new().unwrap();
        assert!(!timer.is_active());
        assert!(timer.is_one_shot());
        assert_eq!(timer.interval(), Duration::ZERO);
    }

    #[test]
    #[serial]
    fn one_shot_fires_exactly_once_then_reverts_shape() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let mut timer = Timer::new().unwrap();
        timer
            .set_one_shot(Duration::from_millis(1), move || {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        sleep_ms(30);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.is_active());
        assert!(timer.is_one_shot());
        assert_eq!(timer.interval(), Duration::ZERO);
    }

    #[test]
    #[serial]
    fn interval_fires_repeatedly_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let mut timer = Timer::new().unwrap();
        timer
            .set_interval(Duration::from_millis(1), move || {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        sleep_ms(30);
        assert!(count.load(Ordering::SeqCst) > 1);
        assert!(timer.is_active());
        assert!(!timer.is_one_shot());
        assert_eq!(timer.interval(), Duration::from_millis(1));

        timer.cancel().unwrap();
        let frozen = count.load(Ordering::SeqCst);
        sleep_ms(10);
        // cancel() is synchronous: no callback starts after it returns.
        assert_eq!(count.load(Ordering::SeqCst), frozen);
        assert!(!timer.is_active());
        assert!(timer.is_one_shot());
        assert_eq!(timer.interval(), Duration::ZERO);
    }

    #[test]
    #[serial]
    fn zero_duration_is_invalid() {
        let mut timer = Timer::new().unwrap();
        let error = timer.set_one_shot(Duration::ZERO, || {}).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidParam);
        assert!(!timer.is_active());
    }

    #[test]
    #[serial]
    fn rearming_replaces_the_previous_schedule() {
        let slow = Arc::new(AtomicUsize::new(0));
        let fast = Arc::new(AtomicUsize::new(0));
        let mut timer = Timer::new().unwrap();

        let seen = Arc::clone(&slow);
        timer
            .set_interval(Duration::from_millis(50), move || {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let seen = Arc::clone(&fast);
        timer
            .set_interval(Duration::from_millis(1), move || {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        sleep_ms(30);
        assert_eq!(slow.load(Ordering::SeqCst), 0);
        assert!(fast.load(Ordering::SeqCst) > 1);
        timer.cancel().unwrap();
    }

    #[test]
    #[serial]
    fn missed_ticks_coalesce() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let mut timer = Timer::new().unwrap();
        timer
            .set_interval(Duration::from_millis(1), move || {
                seen.fetch_add(1, Ordering::SeqCst);
                // Stall the dispatch thread across several intervals.
                std::thread::sleep(Duration::from_millis(10));
            })
            .unwrap();
        sleep_ms(35);
        timer.cancel().unwrap();
        // ~35 ms of 1 ms ticks with a 10 ms callback: without coalescing the
        // count would chase the 35 missed intervals; with it, one callback
        // per dispatch.
        assert!(count.load(Ordering::SeqCst) <= 5);
    }
}
