// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words affinitized

//! Process-wide pool of core-pinned reactors. See [`ReactorPool`].

use super::{EventHandler, Reactor};
use crate::{
    cpu::CpuTopology,
    error::{Error, ErrorKind, Result, track},
    sync::Mutex,
};
use std::{
    collections::HashMap,
    os::fd::RawFd,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
};

/// One reactor per physical core, each dispatch thread affinitized to its
/// core's primary SMT thread.
///
/// Placement is an atomic round-robin rotor, so the common add path shares
/// no lock across cores. Deletions must reach the reactor that holds the
/// handler: the pool records the chosen reactor index per handle at
/// insertion time and consults that record on delete (the mapping is
/// explicit, never guessed).
///
/// Hosts whose topology cannot be read degrade to the synthesized
/// single-core view, i.e. a single reactor.
pub struct ReactorPool {
    reactors: Vec<Reactor>,
    rotor: AtomicU64,
    /// fd → index of the reactor the handler was placed on.
    placements: Mutex<HashMap<RawFd, usize>>,
}

impl ReactorPool {
    /// The process-wide pool, created on first call (lazy, once,
    /// thread-safe). Creation can fail when the host refuses descriptors or
    /// threads, hence the `Result`.
    pub fn instance() -> Result<&'static ReactorPool> {
        static INSTANCE: OnceLock<ReactorPool> = OnceLock::new();
        static INIT: Mutex<()> = Mutex::new(());

        if let Some(pool) = INSTANCE.get() {
            return Ok(pool);
        }
        // Serialize the first construction; losing racers take the fast
        // path above after the winner publishes.
        let _init = INIT.lock();
        if let Some(pool) = INSTANCE.get() {
            return Ok(pool);
        }
        let pool = Self::for_topology(CpuTopology::instance())?;
        Ok(INSTANCE.get_or_init(|| pool))
    }

    /// Builds one reactor per physical core of `topology`.
    fn for_topology(topology: &CpuTopology) -> Result<Self> {
        let mut reactors = Vec::with_capacity(topology.cores().len());
        for core in topology.cores() {
            reactors.push(Reactor::with_affinity(Some(core.primary_thread()))?);
        }
        Ok(Self {
            reactors,
            rotor: AtomicU64::new(0),
            placements: Mutex::new(HashMap::new()),
        })
    }

    /// Number of reactors (= physical cores at construction time).
    #[must_use]
    pub fn len(&self) -> usize { self.reactors.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.reactors.is_empty() }

    /// Places `handler` on the next reactor in round-robin order and
    /// forwards [`Reactor::add_handler`].
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InUse`] when the handle is already placed through this
    /// pool, or whatever the chosen reactor reports.
    pub fn add_handler(&self, handler: Arc<dyn EventHandler>, sync: bool) -> Result<()> {
        let fd = handler.handle();
        let index =
            (self.rotor.fetch_add(1, Ordering::Relaxed) % self.reactors.len() as u64) as usize;
        {
            let mut placements = self.placements.lock();
            if placements.contains_key(&fd) {
                return track(Err(Error::new(
                    ErrorKind::InUse,
                    format!("fd {fd} is already placed in the reactor pool"),
                )));
            }
            placements.insert(fd, index);
        }
        if let Err(error) = self.reactors[index].add_handler(handler, sync) {
            self.placements.lock().remove(&fd);
            return Err(error);
        }
        Ok(())
    }

    /// Deletes `handler` from the reactor it was placed on.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotFound`] when the handle was never placed (or was
    /// already deleted) through this pool.
    pub fn del_handler(&self, handler: &dyn EventHandler, sync: bool) -> Result<()> {
        let fd = handler.handle();
        let Some(index) = self.placements.lock().remove(&fd) else {
            return track(Err(Error::new(
                ErrorKind::NotFound,
                format!("fd {fd} is not placed in the reactor pool"),
            )));
        };
        self.reactors[index].del_handler(handler, sync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::{
        os::fd::{AsRawFd, OwnedFd},
        sync::atomic::AtomicUsize,
        time::{Duration, Instant},
    };

    struct PipeHandler {
        read_end: OwnedFd,
        received: AtomicUsize,
    }

    impl PipeHandler {
        fn pair() -> (Arc<Self>, OwnedFd) {
            let (read_end, write_end) = rustix::pipe::pipe().unwrap();
            (
                Arc::new(Self {
                    read_end,
                    received: AtomicUsize::new(0),
                }),
                write_end,
            )
        }
    }

    impl EventHandler for PipeHandler {
        fn handle(&self) -> RawFd { self.read_end.as_raw_fd() }

        fn on_receive(&self) {
            let mut buffer = [0_u8; 64];
            let _ = rustix::io::read(&self.read_end, &mut buffer[..]);
            self.received.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    #[serial]
    fn pool_has_one_reactor_per_core() {
        let pool = ReactorPool::instance().unwrap();
        assert_eq!(pool.len(), CpuTopology::instance().cores().len());
    }

    #[test]
    #[serial]
    fn handlers_round_robin_and_delete_routes_home() {
        let pool = ReactorPool::instance().unwrap();
        let handlers: Vec<_> = (0..4).map(|_| PipeHandler::pair()).collect();
        for (handler, _) in &handlers {
            pool.add_handler(Arc::clone(handler) as Arc<dyn EventHandler>, true)
                .unwrap();
        }
        for (handler, write_end) in &handlers {
            rustix::io::write(write_end, &[1_u8]).unwrap();
            let deadline = Instant::now() + Duration::from_secs(2);
            while handler.received.load(Ordering::SeqCst) == 0 {
                assert!(Instant::now() < deadline, "pool never dispatched");
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        for (handler, _) in &handlers {
            pool.del_handler(&**handler, true).unwrap();
        }
        // A second delete has nothing to route to.
        let error = pool.del_handler(&*handlers[0].0, true).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[test]
    #[serial]
    fn double_placement_is_in_use() {
        let pool = ReactorPool::instance().unwrap();
        let (handler, _write_end) = PipeHandler::pair();
        pool.add_handler(Arc::clone(&handler) as Arc<dyn EventHandler>, true)
            .unwrap();
        let error = pool
            .add_handler(Arc::clone(&handler) as Arc<dyn EventHandler>, true)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InUse);
        pool.del_handler(&*handler, true).unwrap();
    }
}
