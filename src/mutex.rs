//! A mutual-exclusion lock — a binary semaphore with an RAII guard on top
//! (spec.md §4.4: "Mutex operations are thin wrappers on the semaphore with
//! initial count 1").

use crate::semaphore::Semaphore;
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

/// A mutual-exclusion lock protecting a `T`.
///
/// Structurally a [`Semaphore`] initialized to count 1: `lock` is `down`,
/// `unlock` is `up`. The count is always `0` or `1` as long as callers only
/// reach the inner semaphore through this type.
pub struct Mutex<T: ?Sized> {
    sem: Semaphore,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever granted through a `MutexGuard`,
// which is only handed out while the semaphore's single unit is held.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new, unlocked mutex wrapping `value`.
    pub fn new(value: T) -> Self {
        Self {
            sem: Semaphore::new(1),
            data: UnsafeCell::new(value),
        }
    }

    /// Consumes the mutex, returning the wrapped value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Blocks until the lock is acquired.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.sem.down();
        MutexGuard { mutex: self }
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.sem.try_down() {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Blocks until the lock is acquired or the absolute deadline `at`
    /// passes, whichever comes first.
    pub fn timed_lock(&self, at: Instant) -> Option<MutexGuard<'_, T>> {
        if self.sem.timed_down(at) {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Like [`timed_lock`](Mutex::timed_lock), expressed as a relative
    /// duration from now.
    pub fn lock_timeout(&self, timeout: Duration) -> Option<MutexGuard<'_, T>> {
        self.timed_lock(crate::scheduler::deadline_in(timeout))
    }

    /// Returns a mutable reference to the wrapped value, bypassing the lock.
    /// Sound because `&mut self` statically guarantees no other guard exists.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Releases the lock, handing it directly to the longest-waiting thread
    /// if any, otherwise incrementing the semaphore's count.
    fn unlock(&self) {
        self.sem.up();
    }

    /// Guardless `lock`, for building other primitives (e.g.
    /// [`RecursiveMutex`](crate::rmutex::RecursiveMutex)) directly on top of
    /// the semaphore without carrying a borrowed [`MutexGuard`] across calls.
    pub(crate) fn lock_raw(&self) {
        self.sem.down();
    }

    /// Guardless `try_lock`. See [`lock_raw`](Mutex::lock_raw).
    pub(crate) fn try_lock_raw(&self) -> bool {
        self.sem.try_down()
    }

    /// Guardless `timed_lock`. See [`lock_raw`](Mutex::lock_raw).
    pub(crate) fn timed_lock_raw(&self, at: Instant) -> bool {
        self.sem.timed_down(at)
    }

    /// Guardless `unlock`. See [`lock_raw`](Mutex::lock_raw).
    pub(crate) fn unlock_raw(&self) {
        self.unlock();
    }
}

impl<T: ?Sized + Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("Mutex").field("data", &&*guard).finish(),
            None => f
                .debug_struct("Mutex")
                .field("data", &format_args!("<locked>"))
                .finish(),
        }
    }
}

impl<T> From<T> for Mutex<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// An RAII guard granting exclusive access to a [`Mutex`]'s contents.
/// Dropping it releases the lock.
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding a `MutexGuard` implies the mutex's single unit is
        // held, so no other guard can alias this reference.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Deref`.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    /// Releases the lock immediately. Equivalent to `drop(guard)`, spelled
    /// out for callers translating from an explicit `unlock` API.
    pub fn unlock(self) {
        drop(self);
    }

    /// The mutex this guard borrows from, for primitives (e.g.
    /// [`Condvar`](crate::condvar::Condvar)) built directly on top of
    /// [`Mutex`] that need to drop and reacquire it themselves.
    pub(crate) fn mutex(&self) -> &'a Mutex<T> {
        self.mutex
    }

    /// Releases the lock, guaranteeing the unit is handed directly to the
    /// longest-waiting thread rather than risking it being stolen by a
    /// concurrent [`try_lock`](Mutex::try_lock).
    ///
    /// [`unlock`](MutexGuard::unlock) already does this unconditionally —
    /// `up` always hands off to a queued waiter before incrementing the
    /// count (spec.md §4.3) — so this is equivalent to it. It exists so
    /// callers migrating from an API with a distinct fair/unfair unlock
    /// do not need to special-case this crate.
    pub fn unlock_fair(self) {
        drop(self);
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_then_unlock_round_trips() {
        let mtx = Mutex::new(0);
        {
            let mut guard = mtx.lock();
            *guard += 1;
        }
        assert_eq!(*mtx.lock(), 1);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let mtx = Mutex::new(());
        let guard = mtx.lock();
        assert!(mtx.try_lock().is_none());
        drop(guard);
        assert!(mtx.try_lock().is_some());
    }

    #[test]
    fn timed_lock_fails_while_held() {
        let mtx = Mutex::new(());
        let _guard = mtx.lock();
        assert!(mtx
            .timed_lock(crate::scheduler::deadline_in(Duration::from_millis(1)))
            .is_none());
    }
}
