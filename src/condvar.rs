//! A condition variable paired with a [`Mutex`] (or [`RecursiveMutex`]) for
//! the duration of a single wait (spec.md §4.5).

use crate::mutex::{Mutex, MutexGuard};
use crate::rmutex::{RecursiveMutex, RecursiveMutexGuard};
use crate::scheduler::{self, BlockReason};
use crate::timeout::Timeout;
use crate::wait_queue::{self, WaitQueue};
use log::trace;
use std::fmt;
use std::time::Instant;

struct CondvarState {
    queue: Box<dyn WaitQueue>,
}

/// A condition variable.
///
/// Has no state of its own beyond its wait queue; all state lives in the
/// mutex it is paired with for the duration of a single `wait`. The cv's
/// own spinlock is always dropped before the paired mutex is touched, so
/// the two internal spinlocks never nest in the other order (spec.md §5).
pub struct Condvar {
    state: parking_lot::Mutex<CondvarState>,
}

impl fmt::Debug for Condvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condvar")
            .field("waiters", &self.state.lock().queue.len())
            .finish()
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

impl Condvar {
    /// Creates a new condition variable with no waiters.
    pub fn new() -> Self {
        Self {
            state: parking_lot::Mutex::new(CondvarState {
                queue: wait_queue::new_queue(),
            }),
        }
    }

    /// Atomically releases `guard`'s mutex and blocks until woken by
    /// [`signal`](Condvar::signal) or [`broadcast`](Condvar::broadcast),
    /// then reacquires the mutex before returning.
    ///
    /// The caller must already hold the lock `guard` was obtained from —
    /// enforced by consuming `guard` by value.
    pub fn wait<'a, T: ?Sized + Send>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mtx = guard.mutex();
        let scheduler = scheduler::current();
        scheduler.assert_can_block();
        let me = scheduler.current_thread();

        let mut cv_guard = self.state.lock();
        trace!("condvar {:p}: thread {:?} waiting", self, me);
        let scheduler_in_cb = scheduler.clone();
        scheduler.yield_now(Box::new(move || {
            scheduler_in_cb.thread_has_blocked(me, BlockReason::Condvar);
            cv_guard.queue.enqueue(me);
            // The cv spinlock must be dropped before the mutex is unlocked,
            // never the other way around, so the two spinlocks never nest
            // in conflicting orders.
            drop(cv_guard);
            std::mem::forget(guard);
            mtx.unlock_raw();
        }));

        mtx.lock()
    }

    /// Like [`wait`](Condvar::wait), but also unblocks when the absolute
    /// deadline `at` passes. The deadline governs only the wait itself, not
    /// mutex reacquisition afterwards. Returns the reacquired guard and
    /// whether the wait was satisfied by a signal (`true`) rather than a
    /// timeout (`false`).
    pub fn timed_wait<'a, T: ?Sized + Send>(
        &self,
        guard: MutexGuard<'a, T>,
        at: Instant,
    ) -> (MutexGuard<'a, T>, bool) {
        let mtx = guard.mutex();
        let scheduler = scheduler::current();
        scheduler.assert_can_block();
        let me = scheduler.current_thread();
        let self_addr = self as *const Condvar as usize;

        let mut cv_guard = self.state.lock();
        // SAFETY: `self` outlives the alarm handler, which only runs before
        // `timeout.cancel()` below returns and this function does not return
        // before that call completes.
        let timeout = unsafe {
            Timeout::arm(me, at, move || {
                let this = unsafe { &*(self_addr as *const Condvar) };
                this.state.lock().queue.get_specific(me)
            })
        };

        trace!("condvar {:p}: thread {:?} waiting (timed)", self, me);
        let scheduler_in_cb = scheduler.clone();
        scheduler.yield_now(Box::new(move || {
            scheduler_in_cb.thread_has_blocked(me, BlockReason::Condvar);
            cv_guard.queue.enqueue(me);
            drop(cv_guard);
            std::mem::forget(guard);
            mtx.unlock_raw();
        }));

        let signalled = !timeout.cancel();
        (mtx.lock(), signalled)
    }

    /// Like [`wait`](Condvar::wait), but for a guard from a
    /// [`RecursiveMutex`]: the full recursion depth is released on wait and
    /// restored unconditionally on return, including after a timed-out
    /// wait — matching the common "lock depth preserved across wait"
    /// convention.
    pub fn wait_recurse<'a, T: ?Sized + Send>(
        &self,
        guard: RecursiveMutexGuard<'a, T>,
    ) -> RecursiveMutexGuard<'a, T> {
        let rmtx = guard.mutex();
        let scheduler = scheduler::current();
        scheduler.assert_can_block();
        let me = scheduler.current_thread();
        let saved_depth = rmtx.save_recursion();
        // `guard` is not `Send` (by design — see `RecursiveMutexGuard`), so
        // it cannot be moved into the `Send` callback below. It is forgotten
        // here instead of dropped, which would double-unlock; the real
        // unlock happens via `rmtx.raw_inner().unlock_raw()` inside the
        // callback, at the ordering point spec.md §4.5 requires.
        std::mem::forget(guard);

        let mut cv_guard = self.state.lock();
        trace!("condvar {:p}: thread {:?} waiting (recursive)", self, me);
        let scheduler_in_cb = scheduler.clone();
        scheduler.yield_now(Box::new(move || {
            scheduler_in_cb.thread_has_blocked(me, BlockReason::Condvar);
            cv_guard.queue.enqueue(me);
            drop(cv_guard);
            rmtx.raw_inner().unlock_raw();
        }));

        rmtx.raw_inner().lock_raw();
        rmtx.restore_recursion(me, saved_depth);
        RecursiveMutexGuard::new(rmtx)
    }

    /// Wakes one waiting thread, if any. The caller should hold the paired
    /// mutex in the canonical "test a flag, then signal" idiom, or the
    /// wakeup may be lost to a thread that has not yet started waiting —
    /// this type does not enforce that discipline.
    pub fn signal(&self) {
        let mut guard = self.state.lock();
        if let Some(waiter) = guard.queue.pop_front() {
            drop(guard);
            scheduler::current().make_runnable(waiter);
        }
    }

    /// Wakes every thread waiting at the moment of the call. Threads that
    /// start waiting afterwards are unaffected.
    pub fn broadcast(&self) {
        let drained = {
            let mut guard = self.state.lock();
            // Draining under the lock and waking outside it keeps the
            // critical section short even when many threads are waiting.
            guard.queue.drain()
        };
        if drained.is_empty() {
            return;
        }
        let scheduler = scheduler::current();
        for waiter in drained {
            scheduler.make_runnable(waiter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn broadcast_on_empty_condvar_is_noop() {
        let cv = Condvar::new();
        cv.broadcast();
        cv.signal();
    }

    #[test]
    fn signal_wakes_single_waiter() {
        let pair = Arc::new((Mutex::new(false), Condvar::new()));
        let pair2 = pair.clone();

        let handle = std::thread::spawn(move || {
            let (mtx, cv) = &*pair2;
            let mut ready = mtx.lock();
            while !*ready {
                ready = cv.wait(ready);
            }
        });

        std::thread::sleep(Duration::from_millis(20));
        let (mtx, cv) = &*pair;
        *mtx.lock() = true;
        cv.signal();
        handle.join().unwrap();
    }

    #[test]
    fn timed_wait_times_out_without_signaller() {
        let mtx = Mutex::new(());
        let cv = Condvar::new();
        let guard = mtx.lock();
        let start = Instant::now();
        let (_guard, signalled) =
            cv.timed_wait(guard, scheduler::deadline_in(Duration::from_millis(50)));
        assert!(!signalled);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
