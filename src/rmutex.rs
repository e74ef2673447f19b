//! A recursive mutex — a [`Mutex`] plus owner/depth bookkeeping (spec.md
//! §4.4).

use crate::mutex::Mutex;
use crate::scheduler::{self, ThreadId};
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Sentinel for "no current owner" in `Owner::thread`.
const NO_OWNER: u64 = u64::MAX;

struct Owner {
    /// `ThreadId`'s raw id, or `NO_OWNER`. An atomic rather than a `Cell`:
    /// `lock`/`try_lock`/`timed_lock` read this from threads other than the
    /// current holder, concurrently with the holder's writes in `unlock`
    /// and `save_recursion` — a bare `Cell` would be an unsynchronized data
    /// race. Paired `Release` stores and `Acquire` loads give every reader a
    /// consistent view of the most recent ownership change.
    thread: AtomicU64,
    /// Only ever touched by the current holder (recursion depth changes are
    /// always on that thread's own program order), so `Relaxed` suffices.
    count: AtomicUsize,
}

impl Owner {
    fn current_owner(&self) -> Option<ThreadId> {
        match self.thread.load(Ordering::Acquire) {
            NO_OWNER => None,
            raw => Some(ThreadId(raw)),
        }
    }
}

/// A mutex that may be locked multiple times by the same thread without
/// deadlocking.
///
/// `lockholder` and `count` are only ever written by the current holder
/// (spec.md §4.4); the fast (recursive) path still checks `lockholder` from
/// other threads without taking the inner mutex's spinlock, so that field is
/// an atomic rather than a plain `Cell` to keep the check race-free.
pub struct RecursiveMutex<T: ?Sized> {
    inner: Mutex<()>,
    owner: Owner,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for RecursiveMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for RecursiveMutex<T> {}

impl<T> RecursiveMutex<T> {
    /// Creates a new, unlocked recursive mutex wrapping `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(()),
            owner: Owner {
                thread: AtomicU64::new(NO_OWNER),
                count: AtomicUsize::new(0),
            },
            data: UnsafeCell::new(value),
        }
    }

    /// Consumes the mutex, returning the wrapped value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> RecursiveMutex<T> {
    fn current(&self) -> ThreadId {
        scheduler::current().current_thread()
    }

    fn recurse(&self) -> RecursiveMutexGuard<'_, T> {
        self.owner.count.fetch_add(1, Ordering::Relaxed);
        RecursiveMutexGuard {
            mutex: self,
            _not_send: std::marker::PhantomData,
        }
    }

    fn take_ownership(&self, me: ThreadId) -> RecursiveMutexGuard<'_, T> {
        self.owner.count.store(1, Ordering::Relaxed);
        self.owner.thread.store(me.0, Ordering::Release);
        RecursiveMutexGuard {
            mutex: self,
            _not_send: std::marker::PhantomData,
        }
    }

    /// Blocks until the lock is acquired (recursively or for the first
    /// time by this thread).
    pub fn lock(&self) -> RecursiveMutexGuard<'_, T> {
        let me = self.current();
        if self.owner.current_owner() == Some(me) {
            return self.recurse();
        }
        self.inner.lock_raw();
        self.take_ownership(me)
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(&self) -> Option<RecursiveMutexGuard<'_, T>> {
        let me = self.current();
        if self.owner.current_owner() == Some(me) {
            return Some(self.recurse());
        }
        self.inner.try_lock_raw().then(|| self.take_ownership(me))
    }

    /// Blocks until the lock is acquired or the absolute deadline `at`
    /// passes, whichever comes first.
    pub fn timed_lock(&self, at: Instant) -> Option<RecursiveMutexGuard<'_, T>> {
        let me = self.current();
        if self.owner.current_owner() == Some(me) {
            return Some(self.recurse());
        }
        self.inner.timed_lock_raw(at).then(|| self.take_ownership(me))
    }

    /// Like [`timed_lock`](RecursiveMutex::timed_lock), expressed as a
    /// relative duration from now.
    pub fn lock_timeout(&self, timeout: Duration) -> Option<RecursiveMutexGuard<'_, T>> {
        self.timed_lock(scheduler::deadline_in(timeout))
    }

    /// Returns a mutable reference to the wrapped value, bypassing the lock.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn unlock(&self) {
        let remaining = self.owner.count.fetch_sub(1, Ordering::Relaxed) - 1;
        if remaining == 0 {
            self.owner.thread.store(NO_OWNER, Ordering::Release);
            self.inner.unlock_raw();
        }
    }

    /// The inner mutex, for [`Condvar::wait_recurse`](crate::condvar::Condvar::wait_recurse)
    /// to release and reacquire directly.
    pub(crate) fn raw_inner(&self) -> &Mutex<()> {
        &self.inner
    }

    /// Saves and zeroes the recursion count, releasing logical ownership
    /// ahead of a full unlock of the inner mutex. Returns the saved count.
    pub(crate) fn save_recursion(&self) -> usize {
        let count = self.owner.count.swap(0, Ordering::Relaxed);
        self.owner.thread.store(NO_OWNER, Ordering::Release);
        count
    }

    /// Restores a recursion count saved by [`save_recursion`](Self::save_recursion)
    /// after the inner mutex has been reacquired.
    pub(crate) fn restore_recursion(&self, me: ThreadId, count: usize) {
        self.owner.count.store(count, Ordering::Relaxed);
        self.owner.thread.store(me.0, Ordering::Release);
    }
}

impl<T: ?Sized + Default> Default for RecursiveMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RecursiveMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecursiveMutex")
            .field("owner", &self.owner.current_owner())
            .field("count", &self.owner.count.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> From<T> for RecursiveMutex<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// An RAII guard granting access to a [`RecursiveMutex`]'s contents.
/// Dropping it releases one level of recursion.
///
/// Not `Send`: `lockholder`/`count` bookkeeping is only race-free when read
/// and written from the thread that took it, so the guard must not cross
/// threads.
pub struct RecursiveMutexGuard<'a, T: ?Sized> {
    mutex: &'a RecursiveMutex<T>,
    // `*const ()` carries no auto trait impls, which is what denies `Send`
    // on stable without the `negative_impls` feature.
    _not_send: std::marker::PhantomData<*const ()>,
}

impl<'a, T: ?Sized> RecursiveMutexGuard<'a, T> {
    /// Constructs a guard directly, for
    /// [`Condvar::wait_recurse`](crate::condvar::Condvar::wait_recurse) to
    /// hand back after reacquiring the inner mutex.
    pub(crate) fn new(mutex: &'a RecursiveMutex<T>) -> Self {
        Self {
            mutex,
            _not_send: std::marker::PhantomData,
        }
    }

    /// The mutex this guard borrows from. See [`new`](Self::new).
    pub(crate) fn mutex(&self) -> &'a RecursiveMutex<T> {
        self.mutex
    }
}

impl<T: ?Sized> Deref for RecursiveMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: a `RecursiveMutexGuard` exists only while the owning
        // thread holds the inner mutex, and only that thread may deref it
        // (it is not `Send`).
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for RecursiveMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Deref`. Aliasing across recursive levels on the same
        // thread is the caller's own reentrancy to manage, exactly as with a
        // POSIX recursive mutex.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for RecursiveMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RecursiveMutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recursive_lock_tracks_depth() {
        let mtx = RecursiveMutex::new(0);
        let g1 = mtx.lock();
        let g2 = mtx.lock();
        let g3 = mtx.lock();
        assert_eq!(mtx.owner.count.load(Ordering::Relaxed), 3);
        drop(g3);
        drop(g2);
        assert_eq!(mtx.owner.count.load(Ordering::Relaxed), 1);
        drop(g1);
        assert_eq!(mtx.owner.count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn try_lock_blocked_by_other_thread() {
        use std::sync::Arc;
        let mtx = Arc::new(RecursiveMutex::new(0));
        let _guard = mtx.lock();

        let mtx2 = mtx.clone();
        let handle = std::thread::spawn(move || mtx2.try_lock().is_some());
        assert!(!handle.join().unwrap());
    }
}
