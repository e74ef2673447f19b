//! A reader-writer lock: two wait queues plus a writer flag and reader count
//! (spec.md §4.6).

use crate::scheduler::{self, BlockReason};
use crate::timeout::Timeout;
use crate::wait_queue::{self, WaitQueue};
use log::trace;
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

struct RwLockState {
    has_writer: bool,
    nr_readers: usize,
    readers: Box<dyn WaitQueue>,
    writers: Box<dyn WaitQueue>,
}

/// A reader-writer lock protecting a `T`.
///
/// Writer-preferring: on a writer's release, any queued writer is woken
/// before any queued reader (spec.md §4.6). This bounds writer latency under
/// steady reader load at the cost of allowing reader starvation under
/// steady writer load — a deliberate choice, not an oversight.
pub struct RwLock<T: ?Sized> {
    state: parking_lot::Mutex<RwLockState>,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for RwLock<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    /// Creates a new reader-writer lock, unlocked, wrapping `value`.
    pub fn new(value: T) -> Self {
        Self {
            state: parking_lot::Mutex::new(RwLockState {
                has_writer: false,
                nr_readers: 0,
                readers: wait_queue::new_queue(),
                writers: wait_queue::new_queue(),
            }),
            data: UnsafeCell::new(value),
        }
    }

    /// Consumes the lock, returning the wrapped value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> RwLock<T> {
    /// Blocks until a read lock is acquired. Multiple readers may hold the
    /// lock simultaneously as long as no writer holds or is queued ahead.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        let scheduler = scheduler::current();
        scheduler.assert_can_block();

        let mut guard = self.state.lock();
        if !guard.has_writer {
            guard.nr_readers += 1;
            return RwLockReadGuard { lock: self };
        }

        let me = scheduler.current_thread();
        let scheduler_in_cb = scheduler.clone();
        trace!("rwlock {:p}: thread {:?} blocking for read", self, me);
        scheduler.yield_now(Box::new(move || {
            scheduler_in_cb.thread_has_blocked(me, BlockReason::RwLockRead);
            guard.readers.enqueue(me);
            drop(guard);
        }));

        RwLockReadGuard { lock: self }
    }

    /// Attempts to acquire a read lock without blocking.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        let mut guard = self.state.lock();
        if guard.has_writer {
            return None;
        }
        guard.nr_readers += 1;
        Some(RwLockReadGuard { lock: self })
    }

    /// Blocks until a read lock is acquired or the absolute deadline `at`
    /// passes, whichever comes first.
    pub fn timed_read(&self, at: Instant) -> Option<RwLockReadGuard<'_, T>> {
        let scheduler = scheduler::current();
        scheduler.assert_can_block();

        let mut guard = self.state.lock();
        if !guard.has_writer {
            guard.nr_readers += 1;
            return Some(RwLockReadGuard { lock: self });
        }

        let me = scheduler.current_thread();
        let self_addr = self as *const RwLock<T> as usize;

        // SAFETY: see `Mutex::timed_lock` — `self` outlives the handler
        // because this call does not return before `timeout.cancel()` does.
        let timeout = unsafe {
            Timeout::arm(me, at, move || {
                let this = unsafe { &*(self_addr as *const RwLock<T>) };
                this.state.lock().readers.get_specific(me)
            })
        };

        let scheduler_in_cb = scheduler.clone();
        scheduler.yield_now(Box::new(move || {
            scheduler_in_cb.thread_has_blocked(me, BlockReason::RwLockRead);
            guard.readers.enqueue(me);
            drop(guard);
        }));

        if timeout.cancel() {
            None
        } else {
            Some(RwLockReadGuard { lock: self })
        }
    }

    /// Like [`timed_read`](RwLock::timed_read), expressed as a relative
    /// duration from now.
    pub fn read_timeout(&self, timeout: Duration) -> Option<RwLockReadGuard<'_, T>> {
        self.timed_read(scheduler::deadline_in(timeout))
    }

    /// Blocks until the write lock is acquired exclusively.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        let scheduler = scheduler::current();
        scheduler.assert_can_block();

        let mut guard = self.state.lock();
        if !guard.has_writer && guard.nr_readers == 0 {
            guard.has_writer = true;
            return RwLockWriteGuard { lock: self };
        }

        let me = scheduler.current_thread();
        let scheduler_in_cb = scheduler.clone();
        trace!("rwlock {:p}: thread {:?} blocking for write", self, me);
        scheduler.yield_now(Box::new(move || {
            scheduler_in_cb.thread_has_blocked(me, BlockReason::RwLockWrite);
            guard.writers.enqueue(me);
            drop(guard);
        }));

        RwLockWriteGuard { lock: self }
    }

    /// Attempts to acquire the write lock without blocking.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        let mut guard = self.state.lock();
        if guard.has_writer || guard.nr_readers != 0 {
            return None;
        }
        guard.has_writer = true;
        Some(RwLockWriteGuard { lock: self })
    }

    /// Blocks until the write lock is acquired or the absolute deadline
    /// `at` passes, whichever comes first.
    pub fn timed_write(&self, at: Instant) -> Option<RwLockWriteGuard<'_, T>> {
        let scheduler = scheduler::current();
        scheduler.assert_can_block();

        let mut guard = self.state.lock();
        if !guard.has_writer && guard.nr_readers == 0 {
            guard.has_writer = true;
            return Some(RwLockWriteGuard { lock: self });
        }

        let me = scheduler.current_thread();
        let self_addr = self as *const RwLock<T> as usize;

        let timeout = unsafe {
            Timeout::arm(me, at, move || {
                let this = unsafe { &*(self_addr as *const RwLock<T>) };
                this.state.lock().writers.get_specific(me)
            })
        };

        let scheduler_in_cb = scheduler.clone();
        scheduler.yield_now(Box::new(move || {
            scheduler_in_cb.thread_has_blocked(me, BlockReason::RwLockWrite);
            guard.writers.enqueue(me);
            drop(guard);
        }));

        if timeout.cancel() {
            None
        } else {
            Some(RwLockWriteGuard { lock: self })
        }
    }

    /// Like [`timed_write`](RwLock::timed_write), expressed as a relative
    /// duration from now.
    pub fn write_timeout(&self, timeout: Duration) -> Option<RwLockWriteGuard<'_, T>> {
        self.timed_write(scheduler::deadline_in(timeout))
    }

    /// Returns a mutable reference to the wrapped value, bypassing the lock.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn unlock_read(&self) {
        let scheduler = scheduler::current();
        let mut guard = self.state.lock();
        guard.nr_readers -= 1;
        if guard.nr_readers == 0 {
            if let Some(writer) = guard.writers.pop_front() {
                guard.has_writer = true;
                drop(guard);
                scheduler.make_runnable(writer);
            }
        }
    }

    fn unlock_write(&self) {
        let scheduler = scheduler::current();
        let mut guard = self.state.lock();
        if let Some(writer) = guard.writers.pop_front() {
            // Hand off directly: `has_writer` stays `true` the whole time,
            // so no reader can slip in between this release and the new
            // writer actually resuming.
            drop(guard);
            scheduler.make_runnable(writer);
            return;
        }

        guard.has_writer = false;
        let woken = guard.readers.drain();
        guard.nr_readers = woken.len();
        drop(guard);
        for reader in woken {
            scheduler.make_runnable(reader);
        }
    }
}

impl<T: ?Sized + Default> Default for RwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_read() {
            Some(guard) => f.debug_struct("RwLock").field("data", &&*guard).finish(),
            None => f
                .debug_struct("RwLock")
                .field("data", &format_args!("<locked>"))
                .finish(),
        }
    }
}

impl<T> From<T> for RwLock<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized> Drop for RwLock<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        debug_assert!(
            state.readers.is_empty() && state.writers.is_empty(),
            "RwLock dropped while threads were still waiting on it"
        );
    }
}

/// An RAII guard granting shared read access to an [`RwLock`]'s contents.
pub struct RwLockReadGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

impl<T: ?Sized> Deref for RwLockReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding a `RwLockReadGuard` implies no writer holds the
        // lock, so shared access does not alias a `&mut T`.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock_read();
    }
}

impl<T: ?Sized> RwLockReadGuard<'_, T> {
    /// Releases the read lock immediately. Equivalent to `drop(guard)`.
    pub fn unlock(self) {
        drop(self);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwLockReadGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// An RAII guard granting exclusive write access to an [`RwLock`]'s
/// contents.
pub struct RwLockWriteGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

impl<T: ?Sized> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding a `RwLockWriteGuard` implies exclusive access.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Deref`.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock_write();
    }
}

impl<T: ?Sized> RwLockWriteGuard<'_, T> {
    /// Releases the write lock immediately. Equivalent to `drop(guard)`.
    pub fn unlock(self) {
        drop(self);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwLockWriteGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn multiple_readers_allowed() {
        let lock = RwLock::new(5);
        let r1 = lock.read();
        let r2 = lock.read();
        assert_eq!(*r1, 5);
        assert_eq!(*r2, 5);
    }

    #[test]
    fn try_write_fails_while_read_held() {
        let lock = RwLock::new(0);
        let _r = lock.read();
        assert!(lock.try_write().is_none());
    }

    #[test]
    fn round_trip_read_unlock_restores_state() {
        let lock = RwLock::new(0);
        {
            let _r = lock.read();
        }
        assert!(lock.try_write().is_some());
    }

    #[test]
    fn writer_runs_before_new_reader_on_release() {
        // Per spec.md §4.6, `rdlock` only checks `has_writer`, so a reader
        // racing a merely-*queued* writer is not blocked by it — only a
        // reader whose `read()` call happens after the writer has actually
        // been handed `has_writer` is guaranteed to queue behind it. That
        // hand-off happens synchronously, under the lock, inside the last
        // held reader's `unlock_read`, so joining that reader thread before
        // spawning the new one is what makes this deterministic rather than
        // a race.
        let lock = Arc::new(RwLock::new(0));
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let held = lock.read();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            let log = log.clone();
            handles.push(std::thread::spawn(move || {
                let _w = lock.write();
                log.lock().push("writer");
            }));
        }
        std::thread::sleep(Duration::from_millis(20));
        drop(held);

        let lock2 = lock.clone();
        let log2 = log.clone();
        let reader = std::thread::spawn(move || {
            let _r = lock2.read();
            log2.lock().push("reader");
        });

        for h in handles {
            h.join().unwrap();
        }
        reader.join().unwrap();

        assert_eq!(log.lock().first().copied(), Some("writer"));
    }
}
