//! Error type for the handful of fallible setup-time operations.
//!
//! Everything on the hot blocking paths (`down`, `lock`, `wait`, ...) is
//! infallible once its documented preconditions are met: a timeout is a
//! `bool`, a `try_*` failure is a `bool`, and misuse is a fatal assertion
//! (see the crate-level docs and spec §7). [`Error`] exists only for the
//! setup-time calls that can genuinely fail, such as installing a scheduler
//! twice.

use std::fmt;

/// The kind of a fallible setup-time failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A [`Scheduler`](crate::scheduler::Scheduler), an
    /// [`AlarmService`](crate::scheduler::AlarmService), or a
    /// [`WaitQueueFactory`](crate::wait_queue::WaitQueueFactory) was already
    /// installed for this process.
    SchedulerAlreadyInstalled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ErrorKind::SchedulerAlreadyInstalled => "a scheduler is already installed",
        };
        f.write_str(msg)
    }
}

/// Error type returned by the crate's fallible setup-time operations.
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

impl Error {
    /// Creates a new error of the given kind.
    pub(crate) fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

/// Result alias using this crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
