//! Cooperative synchronization primitives for a user-level M:N threading
//! runtime.
//!
//! This crate provides the blocking primitives a "2LS" (second-level
//! scheduler) offers its user threads: a counting [`Semaphore`], a
//! [`Mutex`], a [`RecursiveMutex`], a [`Condvar`] and an [`RwLock`]. Every
//! primitive supports an untimed, a non-blocking `try`, and an
//! absolute-deadline `timed` variant, and none of them ever traps into the
//! kernel — they hand off directly to whatever [`Scheduler`](scheduler::Scheduler)
//! is installed for the current process.
//!
//! # Layering
//!
//! [`Mutex`] is a binary [`Semaphore`]. [`RecursiveMutex`] wraps a [`Mutex`]
//! with owner/depth bookkeeping. [`Condvar::wait`] temporarily releases an
//! external mutex. [`RwLock`] is built from two independent wait queues plus
//! a writer flag and reader count. None of these primitives call into the
//! kernel or park an OS thread directly; they only ever call through the
//! [`Scheduler`](scheduler::Scheduler) and
//! [`WaitQueue`](wait_queue::WaitQueue) contracts, which a real M:N runtime
//! supplies. A reference implementation of both,
//! [`scheduler::StdScheduler`], is shipped for testing and for embedding
//! this crate on top of plain OS threads.

#![warn(missing_docs, rust_2018_idioms, missing_debug_implementations)]

pub mod condvar;
pub mod error;
pub mod mutex;
pub mod rmutex;
pub mod rwlock;
pub mod scheduler;
pub mod semaphore;
pub mod wait_queue;

mod barrier;
mod timeout;

pub use barrier::{Barrier, BarrierWaitResult};
pub use condvar::Condvar;
pub use error::{Error, ErrorKind};
pub use mutex::{Mutex, MutexGuard};
pub use rmutex::{RecursiveMutex, RecursiveMutexGuard};
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use scheduler::{BlockReason, Scheduler, ThreadId};
pub use semaphore::Semaphore;
