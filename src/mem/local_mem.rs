// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words mlock

//! Anonymous page-aligned memory. See [`LocalMem`].

use crate::error::{Error, ErrorKind, Result, track};
use rustix::mm::{MapFlags, ProtFlags};
use std::ptr::NonNull;

/// An anonymous, private, read-write mapping of whole pages.
///
/// The requested length is rounded up to the page size; [`size`] reports the
/// rounded (mapped) length and bounds every [`get`]. [`new_locked`] pins the
/// region in RAM so it can never take a major fault.
///
/// Dropping the provider unmaps the region; pointers handed out by [`get`]
/// die with it.
///
/// [`get`]: Self::get
/// [`new_locked`]: Self::new_locked
/// [`size`]: Self::size
#[derive(Debug)]
pub struct LocalMem {
    base: NonNull<u8>,
    len: usize,
}

// The region is plain bytes with no interior state; cross-thread access
// discipline is the caller's contract, as with any raw memory.
unsafe impl Send for LocalMem {}
unsafe impl Sync for LocalMem {}

impl LocalMem {
    /// Maps `len > 0` bytes of zeroed anonymous memory, rounded up to whole
    /// pages.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidParam`] for a zero length,
    /// [`ErrorKind::OutOfMemory`] when page-rounding overflows or the kernel
    /// refuses the mapping.
    pub fn new(len: u64) -> Result<Self> { track(Self::map(len, false)) }

    /// Like [`new`], additionally locking the region in RAM.
    ///
    /// # Errors
    ///
    /// As [`new`], plus [`ErrorKind::PermissionDenied`] when the mlock quota
    /// is exhausted.
    ///
    /// [`new`]: Self::new
    pub fn new_locked(len: u64) -> Result<Self> { track(Self::map(len, true)) }

    fn map(len: u64, lock_resident: bool) -> Result<Self> {
        let len = rounded_to_pages(len)?;
        // SAFETY: fresh anonymous mapping at a kernel-chosen address.
        let base = unsafe {
            rustix::mm::mmap_anonymous(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::PRIVATE,
            )
        }
        .map_err(Error::from)?;
        let region = Self {
            base: NonNull::new(base.cast()).ok_or_else(|| {
                Error::new(ErrorKind::OutOfMemory, "anonymous mapping returned null")
            })?,
            len,
        };
        if lock_resident {
            // SAFETY: locking exactly the pages just mapped.
            unsafe { rustix::mm::mlock(region.base.as_ptr().cast(), region.len) }
                .map_err(Error::from)?;
        }
        Ok(region)
    }

    /// Returns a pointer to byte `offset` of the region.
    ///
    /// The pointer is valid until the provider is dropped.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidParam`] when `offset >= size()`.
    pub fn get(&self, offset: u64) -> Result<NonNull<u8>> {
        track(self.at(offset))
    }

    fn at(&self, offset: u64) -> Result<NonNull<u8>> {
        if offset >= self.len as u64 {
            return Err(Error::new(
                ErrorKind::InvalidParam,
                format!("offset {offset} is past the end of a {} byte region", self.len),
            ));
        }
        // SAFETY: offset < len, so the address stays inside the mapping.
        Ok(unsafe { self.base.add(offset as usize) })
    }

    /// Mapped length in bytes (page-rounded).
    #[must_use]
    pub fn size(&self) -> u64 { self.len as u64 }
}

impl Drop for LocalMem {
    fn drop(&mut self) {
        // SAFETY: unmapping the exact region mapped in `map`.
        if let Err(errno) = unsafe { rustix::mm::munmap(self.base.as_ptr().cast(), self.len) } {
            tracing::warn!("unmapping local region: {errno}");
        }
    }
}

/// Rounds `len` up to whole pages, guarding the zero and overflow contracts.
pub(super) fn rounded_to_pages(len: u64) -> Result<usize> {
    if len == 0 {
        return Err(Error::new(ErrorKind::InvalidParam, "region length is zero"));
    }
    let page = rustix::param::page_size() as u64;
    let rounded = len
        .checked_next_multiple_of(page)
        .ok_or_else(|| Error::new(ErrorKind::OutOfMemory, "length overflows page rounding"))?;
    usize::try_from(rounded)
        .map_err(|_| Error::new(ErrorKind::OutOfMemory, "length exceeds the address space"))
}
