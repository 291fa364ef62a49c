// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words mlock mlockall munmaps

//! Page-aligned memory providers: anonymous local regions and POSIX-named
//! shared segments.
//!
//! Both providers hand out raw byte pointers via `get(offset)` and munmap on
//! drop. The regions themselves are unsynchronized; layers above impose
//! whatever ordering they need (that is the point of a shared segment).

mod local_mem;
mod shm_mem;

pub use local_mem::*;
pub use shm_mem::*;

use crate::error::{Error, Result, track};

/// Locks every current and future page of the process in RAM
/// (`mlockall(MCL_CURRENT | MCL_FUTURE)`).
///
/// Latency-critical services call this once at startup so that neither the
/// providers here nor anything else ever takes a major fault.
///
/// # Errors
///
/// [`PermissionDenied`] when the `RLIMIT_MEMLOCK` quota or capabilities
/// forbid it.
///
/// [`PermissionDenied`]: crate::error::ErrorKind::PermissionDenied
pub fn lock_all_pages() -> Result<()> {
    track(
        rustix::mm::mlockall(rustix::mm::MlockAllFlags::CURRENT | rustix::mm::MlockAllFlags::FUTURE)
            .map_err(Error::from),
    )
}
