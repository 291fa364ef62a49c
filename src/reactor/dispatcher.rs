// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll eventfd EINTR affinitized

//! The per-thread dispatcher. See [`Reactor`] and the [module docs](super).

use super::EventHandler;
use crate::{
    backoff::Backoff,
    error::{Error, ErrorKind, Result, record_error, track},
    sync::{Condition, Mutex},
    thread::Thread,
};
use mio::{Events, Interest, Poll, Token, Waker, unix::SourceFd};
use std::{
    collections::HashMap,
    os::fd::RawFd,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    thread::ThreadId,
};

/// Token reserved for the wake channel; real handles use their fd as token,
/// and no fd reaches `usize::MAX`.
const WAKE_TOKEN: Token = Token(usize::MAX);

/// Readiness batch size per poll round.
const EVENT_CAPACITY: usize = 1_024;

/// Admin requests are epoch-numbered; the dispatcher acknowledges the whole
/// epoch between dispatch batches.
#[derive(Debug, Default)]
struct AdminEpoch {
    requested: u64,
    acknowledged: u64,
}

/// State shared between admin threads and the dispatch thread.
struct ReactorShared {
    /// Cloned mio registry; register/deregister are thread-safe.
    registry: mio::Registry,
    /// The wake channel (counting eventfd on Linux). Tokens coalesce.
    waker: Waker,
    /// fd → handler. The Arc is cloned out before dispatch so no lock is
    /// held during callbacks.
    handlers: Mutex<HashMap<RawFd, Arc<dyn EventHandler>>>,
    epoch: Mutex<AdminEpoch>,
    epoch_acknowledged: Condition,
    running: AtomicBool,
    /// Set once by the dispatch thread; used to detect admin calls made from
    /// inside a callback.
    dispatch_thread: OnceLock<ThreadId>,
}

impl ReactorShared {
    /// Marks every admin request issued so far as observed. Called by the
    /// dispatcher between batches, never mid-callback, which is what makes
    /// the synchronous add/del contract hold.
    fn acknowledge_admin(&self) {
        let mut epoch = self.epoch.lock();
        if epoch.acknowledged != epoch.requested {
            epoch.acknowledged = epoch.requested;
            self.epoch_acknowledged.broadcast();
        }
    }
}

/// Edge-triggered event dispatcher owning a multiplexer set, a wake channel,
/// and one dispatch thread.
///
/// See the [module docs](super) for the dispatch/admin handshake. Handlers
/// are borrowed (as [`Arc`]s) only while registered; the reactor never
/// outlives-or-destroys client state beyond dropping its `Arc` clones.
///
/// Dropping the reactor quiesces dispatch first: the running flag is
/// cleared, wake tokens are posted until the dispatch thread exits, and only
/// then are the multiplexer and wake descriptors released.
pub struct Reactor {
    shared: Arc<ReactorShared>,
    dispatch: Option<Thread>,
}

impl Reactor {
    /// Creates a reactor with an unpinned dispatch thread.
    pub fn new() -> Result<Self> { Self::with_affinity(None) }

    /// Creates a reactor whose dispatch thread is affinitized to the given
    /// logical CPU. Pinning failure is downgraded to a warning: a reactor
    /// on the wrong core beats no reactor.
    pub fn with_affinity(pinned_cpu: Option<usize>) -> Result<Self> {
        track(Self::create(pinned_cpu))
    }

    fn create(pinned_cpu: Option<usize>) -> Result<Self> {
        let poll = Poll::new().map_err(Error::from)?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN).map_err(Error::from)?;
        let registry = poll.registry().try_clone().map_err(Error::from)?;
        let shared = Arc::new(ReactorShared {
            registry,
            waker,
            handlers: Mutex::new(HashMap::new()),
            epoch: Mutex::new(AdminEpoch::default()),
            epoch_acknowledged: Condition::new(),
            running: AtomicBool::new(true),
            dispatch_thread: OnceLock::new(),
        });

        let dispatch_shared = Arc::clone(&shared);
        let name = match pinned_cpu {
            Some(cpu) => format!("reactor-cpu{cpu}"),
            None => "reactor".to_string(),
        };
        let dispatch = Thread::builder().name(name).spawn(move || {
            let _ = dispatch_shared
                .dispatch_thread
                .set(std::thread::current().id());
            if let Some(cpu) = pinned_cpu {
                pin_current_thread(cpu);
            }
            dispatch_loop(poll, &dispatch_shared);
        })?;

        Ok(Self {
            shared,
            dispatch: Some(dispatch),
        })
    }

    /// Inserts `handler` into the multiplexer set, watching its handle for
    /// readable readiness (edge-triggered, with hang-up and error
    /// reporting).
    ///
    /// With `sync` set, returns only once the dispatch thread has observed
    /// the insertion; the registration then happens-before the first
    /// callback. Concurrent callers are linearized by the handler-table
    /// mutex.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidParam`] for a negative handle,
    /// [`ErrorKind::InUse`] when the fd is already registered here, or the
    /// mapped OS error from the multiplexer.
    pub fn add_handler(&self, handler: Arc<dyn EventHandler>, sync: bool) -> Result<()> {
        track(self.add_handler_inner(handler, sync))
    }

    fn add_handler_inner(&self, handler: Arc<dyn EventHandler>, sync: bool) -> Result<()> {
        let fd = handler.handle();
        if fd < 0 {
            return Err(Error::new(ErrorKind::InvalidParam, "negative native handle"));
        }
        {
            let mut handlers = self.shared.handlers.lock();
            if handlers.contains_key(&fd) {
                return Err(Error::new(
                    ErrorKind::InUse,
                    format!("fd {fd} is already registered with this reactor"),
                ));
            }
            self.shared
                .registry
                .register(&mut SourceFd(&fd), Token(fd as usize), Interest::READABLE)
                .map_err(Error::from)?;
            handlers.insert(fd, handler);
        }
        self.notify_dispatcher(sync)
    }

    /// Removes `handler` from the multiplexer set.
    ///
    /// With `sync` set, returns only once any in-flight callback for the
    /// handler has completed; afterwards no callback on it can start.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotFound`] when the handle is not registered here.
    pub fn del_handler(&self, handler: &dyn EventHandler, sync: bool) -> Result<()> {
        track(self.del_handler_inner(handler.handle(), sync))
    }

    fn del_handler_inner(&self, fd: RawFd, sync: bool) -> Result<()> {
        {
            let mut handlers = self.shared.handlers.lock();
            if handlers.remove(&fd).is_none() {
                return Err(Error::new(
                    ErrorKind::NotFound,
                    format!("fd {fd} is not registered with this reactor"),
                ));
            }
            if let Err(error) = self.shared.registry.deregister(&mut SourceFd(&fd)) {
                // The handle may already be closed; the table entry is gone
                // either way, so dispatch cannot reach the handler again.
                tracing::warn!("deregistering fd {fd}: {error}");
            }
        }
        self.notify_dispatcher(sync)
    }

    /// Posts a wake token; with `sync`, additionally waits for the dispatch
    /// thread to acknowledge the current admin epoch.
    fn notify_dispatcher(&self, sync: bool) -> Result<()> {
        let shared = &self.shared;
        if shared.dispatch_thread.get() == Some(&std::thread::current().id()) {
            // Called from inside a callback: the dispatcher is this very
            // thread, so observation is immediate and waiting would
            // deadlock.
            return Ok(());
        }
        if !sync {
            shared.waker.wake().map_err(Error::from)?;
            return Ok(());
        }
        let mut epoch = shared.epoch.lock();
        epoch.requested += 1;
        let target = epoch.requested;
        shared.waker.wake().map_err(Error::from)?;
        self.shared.epoch_acknowledged.wait(&mut epoch, |e| {
            e.acknowledged >= target || !shared.running.load(Ordering::Acquire)
        });
        Ok(())
    }

    /// Number of currently registered handlers.
    #[must_use]
    pub fn len(&self) -> usize { self.shared.handlers.lock().len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(mut dispatch) = self.dispatch.take() {
            let mut backoff = Backoff::default();
            while !dispatch.is_finished() {
                if let Err(error) = self.shared.waker.wake() {
                    tracing::warn!("waking dispatch thread for shutdown: {error}");
                    break;
                }
                backoff.spin_once();
            }
            if dispatch.join().is_err() {
                tracing::error!("reactor dispatch thread panicked");
            }
        }
    }
}

/// Pins the calling thread to one logical CPU.
fn pin_current_thread(cpu: usize) {
    let mut cpu_set = rustix::thread::CpuSet::new();
    cpu_set.set(cpu);
    if let Err(errno) = rustix::thread::sched_setaffinity(None, &cpu_set) {
        tracing::warn!("pinning dispatch thread to cpu {cpu}: {errno}");
    }
}

/// The dispatch loop. Runs on the reactor's own thread, which owns the
/// `Poll`.
fn dispatch_loop(mut poll: Poll, shared: &ReactorShared) {
    let mut events = Events::with_capacity(EVENT_CAPACITY);
    while shared.running.load(Ordering::Acquire) {
        if let Err(error) = poll.poll(&mut events, None) {
            // EINTR: interrupted by a signal, safe to retry.
            if error.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            record_error(error.into());
            tracing::error!("reactor poll failed; dispatch thread exiting");
            break;
        }
        for event in &events {
            if event.token() == WAKE_TOKEN {
                // Admin nudge; tokens coalesce inside the wake channel.
                continue;
            }
            let fd = event.token().0 as RawFd;
            let handler = shared.handlers.lock().get(&fd).cloned();
            let Some(handler) = handler else {
                // Deleted between readiness and dispatch.
                continue;
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if event.is_read_closed() {
                    handler.on_close();
                } else if event.is_error() {
                    handler.on_error();
                } else {
                    handler.on_receive();
                }
            }));
            if outcome.is_err() {
                record_error(Error::new(
                    ErrorKind::OperationFailed,
                    format!("event callback panicked for fd {fd}"),
                ));
                tracing::error!("event callback panicked for fd {fd}; dispatch continues");
            }
        }
        shared.acknowledge_admin();
    }
    // Release any admin waiter, including those that arrive after exit.
    shared.running.store(false, Ordering::Release);
    let mut epoch = shared.epoch.lock();
    epoch.acknowledged = epoch.requested;
    shared.epoch_acknowledged.broadcast();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{
        os::fd::{AsRawFd, OwnedFd},
        sync::atomic::AtomicUsize,
        time::{Duration, Instant},
    };

    /// Pipe-backed handler counting its callbacks. `started` ticks when a
    /// receive callback begins, `received` when it completes.
    struct PipeHandler {
        read_end: OwnedFd,
        started: AtomicUsize,
        received: AtomicUsize,
        closed: AtomicUsize,
        hold: Duration,
    }

    impl PipeHandler {
        fn pair(hold: Duration) -> (Arc<Self>, OwnedFd) {
            let (read_end, write_end) = rustix::pipe::pipe().unwrap();
            (
                Arc::new(Self {
                    read_end,
                    started: AtomicUsize::new(0),
                    received: AtomicUsize::new(0),
                    closed: AtomicUsize::new(0),
                    hold,
                }),
                write_end,
            )
        }
    }

    impl EventHandler for PipeHandler {
        fn handle(&self) -> RawFd { self.read_end.as_raw_fd() }

        fn on_receive(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
            let mut buffer = [0_u8; 64];
            let _ = rustix::io::read(&self.read_end, &mut buffer[..]);
            std::thread::sleep(self.hold);
            self.received.fetch_add(1, Ordering::SeqCst);
        }

        fn on_close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn write_byte(fd: &OwnedFd) {
        rustix::io::write(fd, &[1_u8]).unwrap();
    }

    #[test]
    fn on_receive_fires_for_readable_handle() {
        let reactor = Reactor::new().unwrap();
        let (handler, write_end) = PipeHandler::pair(Duration::ZERO);
        reactor.add_handler(Arc::clone(&handler) as Arc<dyn EventHandler>, true).unwrap();
        assert_eq!(reactor.len(), 1);

        write_byte(&write_end);
        let deadline = Instant::now() + Duration::from_secs(2);
        while handler.received.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "callback never fired");
            std::thread::sleep(Duration::from_millis(1));
        }
        reactor.del_handler(&*handler, true).unwrap();
        assert!(reactor.is_empty());
    }

    #[test]
    fn sync_del_waits_for_inflight_callback() {
        let reactor = Reactor::new().unwrap();
        let (handler, write_end) = PipeHandler::pair(Duration::from_millis(20));
        reactor.add_handler(Arc::clone(&handler) as Arc<dyn EventHandler>, true).unwrap();

        write_byte(&write_end);
        // Wait until the dispatcher is inside the slow callback.
        let deadline = Instant::now() + Duration::from_secs(2);
        while handler.started.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "callback never started");
            std::thread::sleep(Duration::from_millis(1));
        }
        reactor.del_handler(&*handler, true).unwrap();
        // del(sync) returned, so the 20 ms callback must have completed.
        assert_eq!(handler.received.load(Ordering::SeqCst), 1);

        // No callback may start after the sync delete.
        write_byte(&write_end);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(handler.received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hang_up_dispatches_on_close() {
        let reactor = Reactor::new().unwrap();
        let (handler, write_end) = PipeHandler::pair(Duration::ZERO);
        reactor.add_handler(Arc::clone(&handler) as Arc<dyn EventHandler>, true).unwrap();

        drop(write_end);
        let deadline = Instant::now() + Duration::from_secs(2);
        while handler.closed.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "on_close never fired");
            std::thread::sleep(Duration::from_millis(1));
        }
        reactor.del_handler(&*handler, true).unwrap();
    }

    #[test]
    fn duplicate_registration_is_in_use() {
        let reactor = Reactor::new().unwrap();
        let (handler, _write_end) = PipeHandler::pair(Duration::ZERO);
        reactor.add_handler(Arc::clone(&handler) as Arc<dyn EventHandler>, true).unwrap();
        let error = reactor
            .add_handler(Arc::clone(&handler) as Arc<dyn EventHandler>, true)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InUse);
    }

    #[test]
    fn deleting_unknown_handler_is_not_found() {
        let reactor = Reactor::new().unwrap();
        let (handler, _write_end) = PipeHandler::pair(Duration::ZERO);
        let error = reactor.del_handler(&*handler, true).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn panicking_callback_does_not_poison_the_loop() {
        struct PanickingHandler {
            read_end: OwnedFd,
        }
        impl EventHandler for PanickingHandler {
            fn handle(&self) -> RawFd { self.read_end.as_raw_fd() }
            fn on_receive(&self) {
                let mut buffer = [0_u8; 8];
                let _ = rustix::io::read(&self.read_end, &mut buffer[..]);
                panic!("deliberate callback panic");
            }
        }

        let reactor = Reactor::new().unwrap();
        let (read_end, panicking_write) = rustix::pipe::pipe().unwrap();
        let panicking = Arc::new(PanickingHandler { read_end });
        let (counting, counting_write) = PipeHandler::pair(Duration::ZERO);
        reactor.add_handler(Arc::clone(&panicking) as Arc<dyn EventHandler>, true).unwrap();
        reactor.add_handler(Arc::clone(&counting) as Arc<dyn EventHandler>, true).unwrap();

        write_byte(&panicking_write);
        std::thread::sleep(Duration::from_millis(10));

        // The loop survived the panic and still dispatches other handlers.
        write_byte(&counting_write);
        let deadline = Instant::now() + Duration::from_secs(2);
        while counting.received.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "loop died after panic");
            std::thread::sleep(Duration::from_millis(1));
        }
        reactor.del_handler(&*panicking, true).unwrap();
        reactor.del_handler(&*counting, true).unwrap();
    }

    #[test]
    fn drop_quiesces_dispatch() {
        let (handler, write_end) = PipeHandler::pair(Duration::ZERO);
        {
            let reactor = Reactor::new().unwrap();
            reactor.add_handler(Arc::clone(&handler) as Arc<dyn EventHandler>, true).unwrap();
        }
        // Reactor is gone; writes wake nobody and nothing crashes.
        write_byte(&write_end);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(handler.received.load(Ordering::SeqCst), 0);
    }
}
