// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EAGAIN EWOULDBLOCK EINTR EACCES EPERM ENOMEM ENFILE EMFILE
// cspell:words ENOENT EEXIST EBUSY EADDRINUSE EINVAL ETIMEDOUT ECONNREFUSED

//! Process-wide error taxonomy and the thread-local last-error cell.
//!
//! Every fallible operation in this crate returns [`Result`] **and** records
//! its failure in a per-thread diagnostic cell readable via [`last_error`].
//! The cell exists for the places a `Result` cannot reach: a reactor
//! callback that panics has no caller to return to, so the dispatch loop
//! captures the failure here and keeps running.
//!
//! The cell is cleared whenever a fallible public operation succeeds, so
//! after a successful call [`last_error`] reports `None` rather than a stale
//! failure from an earlier call on the same thread.

use std::cell::RefCell;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of every failure this crate (and its collaborators) can
/// report.
///
/// The network-facing kinds ([`ConnectionRefused`], [`ConnectionClosed`],
/// [`MessageUnknown`], [`MessageTooLong`]) are surfaced on behalf of socket
/// and protocol collaborators built on top of the reactor; the substrate
/// itself never produces them but owns the taxonomy so that one
/// [`last_error`] cell serves the whole stack.
///
/// [`ConnectionClosed`]: ErrorKind::ConnectionClosed
/// [`ConnectionRefused`]: ErrorKind::ConnectionRefused
/// [`MessageTooLong`]: ErrorKind::MessageTooLong
/// [`MessageUnknown`]: ErrorKind::MessageUnknown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorKind {
    /// Resource is already in use (e.g. shm segment already open).
    #[error("already in use")]
    InUse,

    /// Argument outside its contract (size 0, empty name, worker count 0,
    /// offset past the end of a region).
    #[error("invalid parameters were used")]
    InvalidParam,

    /// The connection was refused by the peer.
    #[error("connection refused")]
    ConnectionRefused,

    /// The connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// A timed wait or operation deadline was exceeded.
    #[error("operation timed out")]
    TimedOut,

    /// The OS denied the operation (shm name permissions, mlock quota).
    #[error("permission denied")]
    PermissionDenied,

    /// An allocation or mapping failed.
    #[error("out of memory")]
    OutOfMemory,

    /// A syscall failed without a more specific kind.
    #[error("operation failed")]
    OperationFailed,

    /// The named resource does not exist.
    #[error("not found")]
    NotFound,

    /// A protocol message could not be interpreted.
    #[error("message unknown")]
    MessageUnknown,

    /// A protocol message exceeded its size limit.
    #[error("message too long")]
    MessageTooLong,

    /// Retryable condition; the operation should be performed again later.
    #[error("temporary error")]
    TemporaryError,

    /// An OS error with no mapping in this taxonomy.
    #[error("unknown error")]
    UnknownError,
}

/// An error kind plus human-readable context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
#[error("{kind}: {message}")]
#[diagnostic(code(r3bl_reactor::error))]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind { self.kind }

    #[must_use]
    pub fn message(&self) -> &str { &self.message }

    /// Classifies a raw OS error number into the taxonomy.
    #[must_use]
    pub fn kind_for_raw_os_error(raw: i32) -> ErrorKind {
        use rustix::io::Errno;
        let errno = Errno::from_raw_os_error(raw);
        if errno == Errno::AGAIN || errno == Errno::WOULDBLOCK || errno == Errno::INTR {
            ErrorKind::TemporaryError
        } else if errno == Errno::ACCESS || errno == Errno::PERM {
            ErrorKind::PermissionDenied
        } else if errno == Errno::NOMEM || errno == Errno::NFILE || errno == Errno::MFILE {
            ErrorKind::OutOfMemory
        } else if errno == Errno::NOENT {
            ErrorKind::NotFound
        } else if errno == Errno::EXIST || errno == Errno::BUSY || errno == Errno::ADDRINUSE {
            ErrorKind::InUse
        } else if errno == Errno::INVAL {
            ErrorKind::InvalidParam
        } else if errno == Errno::TIMEDOUT {
            ErrorKind::TimedOut
        } else if errno == Errno::CONNREFUSED {
            ErrorKind::ConnectionRefused
        } else {
            ErrorKind::UnknownError
        }
    }
}

impl From<rustix::io::Errno> for Error {
    fn from(errno: rustix::io::Errno) -> Self {
        Self::new(
            Error::kind_for_raw_os_error(errno.raw_os_error()),
            std::io::Error::from(errno).to_string(),
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(io_error: std::io::Error) -> Self {
        let kind = match io_error.raw_os_error() {
            Some(raw) => Error::kind_for_raw_os_error(raw),
            None => ErrorKind::OperationFailed,
        };
        Self::new(kind, io_error.to_string())
    }
}

thread_local! {
    /// Per-thread writable diagnostic cell.
    static LAST_ERROR: RefCell<Option<Error>> = const { RefCell::new(None) };
}

/// Returns a copy of the last error recorded on this thread, if any.
#[must_use]
pub fn last_error() -> Option<Error> {
    LAST_ERROR.with(|cell| cell.borrow().clone())
}

/// Takes the last error recorded on this thread, leaving `None`.
#[must_use]
pub fn take_last_error() -> Option<Error> {
    LAST_ERROR.with(|cell| cell.borrow_mut().take())
}

/// Records `error` in this thread's diagnostic cell.
pub(crate) fn record_error(error: Error) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(error));
}

/// Routes `result` through the diagnostic cell: failures are recorded,
/// successes clear the cell. Public fallible operations return through this.
pub(crate) fn track<T>(result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => LAST_ERROR.with(|cell| *cell.borrow_mut() = None),
        Err(error) => record_error(error.clone()),
    }
    result
}
