// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words shm ftruncate

//! POSIX-named shared memory. See [`ShmMem`].

use super::local_mem::rounded_to_pages;
use crate::error::{Error, ErrorKind, Result, track};
use rustix::{
    fs::Mode,
    mm::{MapFlags, ProtFlags},
    shm,
};
use std::ptr::NonNull;

/// A POSIX-named shared memory segment, mapped on [`open`] and unmapped on
/// [`close`] (or drop).
///
/// The segment persists in the kernel namespace under its `/name` until
/// [`unlink`] removes it, so two processes constructing providers with the
/// same name share the same pages. Construction only validates; no OS
/// resource exists until [`open`].
///
/// # Example
///
/// ```no_run
/// use r3bl_reactor::ShmMem;
///
/// let mut segment = ShmMem::new(4096, "/telemetry-ring")?;
/// segment.open()?;
/// let base = segment.get(0)?;
/// // ... share `base` with a sibling process ...
/// segment.close()?;
/// ShmMem::unlink("/telemetry-ring")?;
/// # Ok::<(), r3bl_reactor::Error>(())
/// ```
///
/// [`close`]: Self::close
/// [`open`]: Self::open
/// [`unlink`]: Self::unlink
#[derive(Debug)]
pub struct ShmMem {
    name: String,
    len: usize,
    base: Option<NonNull<u8>>,
}

// Same contract as LocalMem: bytes only, caller imposes ordering.
unsafe impl Send for ShmMem {}
unsafe impl Sync for ShmMem {}

/// The constructor-order-flipped spelling used by service configuration
/// code; the provider is the same.
pub type SharedMemory = ShmMem;

impl ShmMem {
    /// Validates a segment of `len > 0` bytes named `name` (a leading `/`
    /// is added when missing). Does not touch the OS.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidParam`] for a zero length or empty name,
    /// [`ErrorKind::OutOfMemory`] when page-rounding overflows.
    pub fn new(len: u64, name: impl Into<String>) -> Result<Self> {
        track(Self::validated(len, name.into()))
    }

    fn validated(len: u64, name: String) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::new(ErrorKind::InvalidParam, "segment name is empty"));
        }
        let name = if name.starts_with('/') {
            name
        } else {
            format!("/{name}")
        };
        Ok(Self {
            name,
            len: rounded_to_pages(len)?,
            base: None,
        })
    }

    /// Creates (if needed) and maps the named segment.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InUse`] when already open, [`ErrorKind::PermissionDenied`]
    /// when the namespace entry belongs to someone else, or the mapped OS
    /// error.
    pub fn open(&mut self) -> Result<()> {
        track(self.map_segment())
    }

    fn map_segment(&mut self) -> Result<()> {
        if self.base.is_some() {
            return Err(Error::new(
                ErrorKind::InUse,
                format!("segment {} is already open", self.name),
            ));
        }
        let fd = shm::open(
            self.name.as_str(),
            shm::OFlags::CREATE | shm::OFlags::RDWR,
            Mode::RUSR | Mode::WUSR,
        )
        .map_err(Error::from)?;
        rustix::fs::ftruncate(&fd, self.len as u64).map_err(Error::from)?;
        // SAFETY: fresh shared mapping of the whole segment; fd may close
        // right after, the mapping survives it.
        let base = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                self.len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
        }
        .map_err(Error::from)?;
        self.base = NonNull::new(base.cast());
        if self.base.is_none() {
            return Err(Error::new(ErrorKind::OutOfMemory, "shared mapping returned null"));
        }
        Ok(())
    }

    /// Unmaps the segment. Idempotent; the namespace entry stays until
    /// [`unlink`].
    ///
    /// [`unlink`]: Self::unlink
    pub fn close(&mut self) -> Result<()> {
        if let Some(base) = self.base.take() {
            // SAFETY: unmapping the exact region mapped in `open`.
            if let Err(errno) = unsafe { rustix::mm::munmap(base.as_ptr().cast(), self.len) } {
                return track(Err(errno.into()));
            }
        }
        track(Ok(()))
    }

    /// Whether the segment is currently mapped.
    #[must_use]
    pub fn opened(&self) -> bool { self.base.is_some() }

    /// Returns a pointer to byte `offset` of the mapped segment, valid until
    /// [`close`] or drop.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotFound`] when the segment is not open,
    /// [`ErrorKind::InvalidParam`] when `offset >= size()`.
    ///
    /// [`close`]: Self::close
    pub fn get(&self, offset: u64) -> Result<NonNull<u8>> {
        track(self.at(offset))
    }

    fn at(&self, offset: u64) -> Result<NonNull<u8>> {
        let Some(base) = self.base else {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("segment {} is not open", self.name),
            ));
        };
        if offset >= self.len as u64 {
            return Err(Error::new(
                ErrorKind::InvalidParam,
                format!("offset {offset} is past the end of a {} byte segment", self.len),
            ));
        }
        // SAFETY: offset < len, so the address stays inside the mapping.
        Ok(unsafe { base.add(offset as usize) })
    }

    /// Mapped length in bytes (page-rounded).
    #[must_use]
    pub fn size(&self) -> u64 { self.len as u64 }

    /// The segment's `/name` in the kernel namespace.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Removes `name` from the kernel namespace; existing mappings survive
    /// until unmapped.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotFound`] when no such segment exists.
    pub fn unlink(name: &str) -> Result<()> {
        let name = if name.starts_with('/') {
            name.to_string()
        } else {
            format!("/{name}")
        };
        track(shm::unlink(name.as_str()).map_err(Error::from))
    }
}

impl Drop for ShmMem {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            tracing::warn!("closing segment {} on drop: {error}", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    fn unique_name(tag: &str) -> String {
        format!("/r3bl-reactor-{tag}-{}", std::process::id())
    }

    #[test]
    fn invalid_constructions_are_rejected() {
        assert_eq!(
            ShmMem::new(0, "/x").unwrap_err().kind(),
            ErrorKind::InvalidParam
        );
        assert_eq!(ShmMem::new(1024, "").unwrap_err().kind(), ErrorKind::InvalidParam);
        assert_eq!(
            ShmMem::new(u64::MAX, "/x").unwrap_err().kind(),
            ErrorKind::OutOfMemory
        );
    }

    #[test]
    fn name_gains_leading_slash() {
        let segment = ShmMem::new(1, "bare-name").unwrap();
        assert_eq!(segment.name(), "/bare-name");
    }

    #[test]
    #[serial]
    fn lifecycle_open_get_close_unlink() {
        let name = unique_name("lifecycle");
        let _ = ShmMem::unlink(&name);

        let mut segment = ShmMem::new(1024, name.as_str()).unwrap();
        assert!(!segment.opened());
        assert_eq!(segment.get(0).unwrap_err().kind(), ErrorKind::NotFound);

        segment.open().unwrap();
        assert!(segment.opened());
        assert!(segment.get(0).is_ok());
        assert_eq!(
            segment.get(segment.size()).unwrap_err().kind(),
            ErrorKind::InvalidParam
        );

        // Double open reports the segment busy.
        assert_eq!(segment.open().unwrap_err().kind(), ErrorKind::InUse);

        segment.close().unwrap();
        assert!(!segment.opened());
        segment.close().unwrap();

        ShmMem::unlink(&name).unwrap();
        assert_eq!(ShmMem::unlink(&name).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    #[serial]
    fn two_providers_share_the_same_bytes() {
        let name = unique_name("shared");
        let _ = ShmMem::unlink(&name);

        let mut writer = ShmMem::new(64, name.as_str()).unwrap();
        let mut reader = ShmMem::new(64, name.as_str()).unwrap();
        writer.open().unwrap();
        reader.open().unwrap();

        // SAFETY: in-bounds, single-threaded test.
        unsafe {
            writer.get(7).unwrap().as_ptr().write(0x5A);
            assert_eq!(reader.get(7).unwrap().as_ptr().read(), 0x5A);
        }

        writer.close().unwrap();
        reader.close().unwrap();
        ShmMem::unlink(&name).unwrap();
    }
}
