// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words mtime munmap remap

//! File-content cache revalidated by `stat`. See [`Cache`].

use crate::{
    error::{Error, ErrorKind, Result, track},
    sync::Mutex,
};
use rustix::{
    fs::{Mode, OFlags},
    mm::{MapFlags, ProtFlags},
};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    ptr::NonNull,
};

/// The identity a cached file is revalidated against: byte size plus
/// modification time. Equal stat ⇒ the cached bytes are served; any
/// divergence ⇒ the file is remapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mtime_sec: i64,
    pub mtime_nsec: i64,
}

impl FileStat {
    /// Stats `path`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotFound`] (or the mapped OS kind) when the file cannot
    /// be stat'ed.
    pub fn query(path: impl AsRef<Path>) -> Result<Self> {
        let stat = rustix::fs::stat(path.as_ref()).map_err(Error::from)?;
        Ok(Self::from(&stat))
    }
}

impl From<&rustix::fs::Stat> for FileStat {
    fn from(stat: &rustix::fs::Stat) -> Self {
        Self {
            size: stat.st_size as u64,
            mtime_sec: stat.st_mtime as i64,
            mtime_nsec: stat.st_mtime_nsec as i64,
        }
    }
}

/// A private read-only mapping of one file's contents.
struct FileMapping {
    base: NonNull<u8>,
    len: usize,
}

// Read-only bytes; shareable across threads by construction.
unsafe impl Send for FileMapping {}
unsafe impl Sync for FileMapping {}

impl FileMapping {
    /// Opens and maps `path`, returning the mapping and the identity it was
    /// mapped at.
    fn map(path: &Path) -> Result<(Self, FileStat)> {
        let fd = rustix::fs::open(path, OFlags::RDONLY | OFlags::CLOEXEC, Mode::empty())
            .map_err(Error::from)?;
        let stat = rustix::fs::fstat(&fd).map_err(Error::from)?;
        let identity = FileStat::from(&stat);
        let len = usize::try_from(identity.size)
            .map_err(|_| Error::new(ErrorKind::OutOfMemory, "file exceeds the address space"))?;
        if len == 0 {
            return Err(Error::new(ErrorKind::InvalidParam, "cannot map an empty file"));
        }
        // SAFETY: fresh read-only mapping of the whole file.
        let base = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ,
                MapFlags::PRIVATE,
                &fd,
                0,
            )
        }
        .map_err(Error::from)?;
        let base = NonNull::new(base.cast())
            .ok_or_else(|| Error::new(ErrorKind::OutOfMemory, "file mapping returned null"))?;
        Ok((Self { base, len }, identity))
    }
}

impl Drop for FileMapping {
    fn drop(&mut self) {
        // SAFETY: unmapping the exact region mapped in `map`.
        if let Err(errno) = unsafe { rustix::mm::munmap(self.base.as_ptr().cast(), self.len) } {
            tracing::warn!("unmapping cached file: {errno}");
        }
    }
}

struct CacheEntry {
    stat: FileStat,
    map: FileMapping,
}

/// Name → mapped-contents cache with `stat` revalidation.
///
/// A hit whose size and mtime still match serves the cached address; a miss
/// or stale hit opens, maps, and replaces the entry. The cache mutex is held
/// across the build, which is what guarantees at most one concurrent build
/// per file name.
///
/// The cache owns every mapping it returns: addresses stay valid until
/// [`remove`], [`clear`], or drop, and callers hold them as non-owning
/// pointers.
///
/// [`clear`]: Self::clear
/// [`remove`]: Self::remove
#[derive(Default)]
pub struct Cache {
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl Cache {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Returns the file's mapped contents, revalidating against a fresh
    /// `stat`.
    ///
    /// # Errors
    ///
    /// Whatever stat, open, or mmap report; the failure is also recorded in
    /// the thread-local error slot.
    pub fn get(&self, path: impl AsRef<Path>) -> Result<NonNull<u8>> {
        let path = path.as_ref();
        let stat = track(FileStat::query(path))?;
        track(self.lookup_or_build(path, &stat))
    }

    /// Like [`get`], revalidating against a `stat` the caller already
    /// obtained (servers stat once per request and reuse it here).
    ///
    /// [`get`]: Self::get
    pub fn get_with(&self, path: impl AsRef<Path>, stat: &FileStat) -> Result<NonNull<u8>> {
        track(self.lookup_or_build(path.as_ref(), stat))
    }

    fn lookup_or_build(&self, path: &Path, stat: &FileStat) -> Result<NonNull<u8>> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(path) {
            if entry.stat == *stat {
                return Ok(entry.map.base);
            }
        }
        // Map before replacing: the old mapping (if any) is still live here,
        // so a stale file never gets its old address handed back by reuse.
        let (map, fresh) = FileMapping::map(path)?;
        let base = map.base;
        entries.insert(path.to_path_buf(), CacheEntry { stat: fresh, map });
        Ok(base)
    }

    /// Drops one entry, unmapping its bytes. Unknown names are ignored.
    pub fn remove(&self, path: impl AsRef<Path>) {
        self.entries.lock().remove(path.as_ref());
    }

    /// Drops every entry.
    pub fn clear(&self) { self.entries.lock().clear(); }

    /// Number of cached files.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.lock().len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{
        io::Write,
        time::{Duration, SystemTime},
    };

    struct TempFile {
        path: PathBuf,
    }

    impl TempFile {
        fn with_contents(tag: &str, contents: &[u8]) -> Self {
            let path = std::env::temp_dir().join(format!(
                "reactor-cache-{tag}-{}",
                std::process::id()
            ));
            std::fs::File::create(&path)
                .unwrap()
                .write_all(contents)
                .unwrap();
            Self { path }
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    #[test]
    fn hit_returns_the_same_address_while_unchanged() {
        let file = TempFile::with_contents("hit", b"hello cache");
        let cache = Cache::new();

        let first = cache.get(&file.path).unwrap();
        assert_eq!(cache.len(), 1);
        let second = cache.get(&file.path).unwrap();
        assert_eq!(first, second);

        // The mapped bytes are the file's contents.
        // SAFETY: in-bounds read of the live mapping.
        let bytes = unsafe { std::slice::from_raw_parts(first.as_ptr(), 11) };
        assert_eq!(bytes, b"hello cache");
    }

    #[test]
    fn size_change_remaps_to_a_new_address() {
        let file = TempFile::with_contents("grow", b"v1");
        let cache = Cache::new();
        let first = cache.get(&file.path).unwrap();

        std::fs::write(&file.path, b"version two").unwrap();
        let second = cache.get(&file.path).unwrap();
        assert_ne!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn mtime_change_remaps_even_at_equal_size() {
        let file = TempFile::with_contents("touch", b"same size");
        let cache = Cache::new();
        let first = cache.get(&file.path).unwrap();

        let handle = std::fs::File::options()
            .write(true)
            .open(&file.path)
            .unwrap();
        handle
            .set_modified(SystemTime::now() - Duration::from_secs(7))
            .unwrap();
        let second = cache.get(&file.path).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn remove_and_clear_drop_entries() {
        let one = TempFile::with_contents("rm-one", b"one");
        let two = TempFile::with_contents("rm-two", b"two");
        let cache = Cache::new();
        cache.get(&one.path).unwrap();
        cache.get(&two.path).unwrap();
        assert_eq!(cache.len(), 2);

        cache.remove(&one.path);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn missing_file_reports_not_found() {
        let cache = Cache::new();
        let error = cache.get("/nonexistent/cache/input").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert_eq!(
            crate::error::last_error().map(|e| e.kind()),
            Some(ErrorKind::NotFound)
        );
    }

    #[test]
    fn caller_provided_stat_controls_revalidation() {
        let file = TempFile::with_contents("stat", b"stat me");
        let cache = Cache::new();
        let stat = FileStat::query(&file.path).unwrap();
        let first = cache.get_with(&file.path, &stat).unwrap();

        // Same stat presented again: still a hit, even though the file
        // changed underneath.
        std::fs::write(&file.path, b"changed").unwrap();
        let second = cache.get_with(&file.path, &stat).unwrap();
        assert_eq!(first, second);
    }
}
