//! A counting semaphore — the foundation [`Mutex`](crate::mutex::Mutex) is
//! built from (spec.md §4.3).

use crate::scheduler::{self, BlockReason};
use crate::timeout::Timeout;
use crate::wait_queue::{self, WaitQueue};
use log::trace;
use std::fmt;
use std::time::{Duration, Instant};

struct SemaphoreState {
    count: usize,
    queue: Box<dyn WaitQueue>,
}

/// A counting semaphore.
///
/// `down` blocks while the count is zero; `up` either hands its unit
/// directly to the longest-waiting blocked thread or, if there are no
/// waiters, increments the count. The direct hand-off is what keeps a
/// released unit from being stolen by a concurrent [`try_down`](Semaphore::try_down)
/// between a waiter being woken and actually resuming (spec.md §4.3).
pub struct Semaphore {
    state: parking_lot::Mutex<SemaphoreState>,
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Semaphore")
            .field("count", &state.count)
            .field("waiters", &state.queue.len())
            .finish()
    }
}

impl Semaphore {
    /// Creates a new semaphore with the given initial count.
    pub fn new(count: usize) -> Self {
        Self {
            state: parking_lot::Mutex::new(SemaphoreState {
                count,
                queue: wait_queue::new_queue(),
            }),
        }
    }

    /// Blocks the calling thread until a unit is available, then consumes it.
    pub fn down(&self) {
        let scheduler = scheduler::current();
        scheduler.assert_can_block();

        let mut guard = self.state.lock();
        if guard.count > 0 {
            guard.count -= 1;
            return;
        }

        let me = scheduler.current_thread();
        let scheduler_in_cb = scheduler.clone();
        trace!("semaphore {:p}: thread {:?} blocking on down", self, me);
        scheduler.yield_now(Box::new(move || {
            // Must happen before the spinlock is dropped: otherwise a
            // concurrent `up` could mark this thread runnable before the
            // scheduler has recorded that it blocked.
            scheduler_in_cb.thread_has_blocked(me, BlockReason::Semaphore);
            guard.queue.enqueue(me);
            drop(guard);
        }));
    }

    /// Attempts to consume a unit without blocking. Returns whether one was
    /// available.
    pub fn try_down(&self) -> bool {
        let mut guard = self.state.lock();
        if guard.count > 0 {
            guard.count -= 1;
            true
        } else {
            false
        }
    }

    /// Blocks until a unit is available or the absolute deadline `at`
    /// passes, whichever comes first. Returns whether a unit was consumed.
    pub fn timed_down(&self, at: Instant) -> bool {
        let scheduler = scheduler::current();
        scheduler.assert_can_block();

        let mut guard = self.state.lock();
        if guard.count > 0 {
            guard.count -= 1;
            return true;
        }

        let me = scheduler.current_thread();
        let self_addr = self as *const Semaphore as usize;

        // SAFETY: `self` is not dropped or moved before `timeout.cancel()`
        // below returns, and `cancel` blocks until any in-flight handler
        // invocation (the only thing that dereferences `self_addr`) has
        // completed.
        let timeout = unsafe {
            Timeout::arm(me, at, move || {
                let this = unsafe { &*(self_addr as *const Semaphore) };
                this.state.lock().queue.get_specific(me)
            })
        };

        let scheduler_in_cb = scheduler.clone();
        scheduler.yield_now(Box::new(move || {
            scheduler_in_cb.thread_has_blocked(me, BlockReason::Semaphore);
            guard.queue.enqueue(me);
            drop(guard);
        }));

        !timeout.cancel()
    }

    /// Like [`timed_down`](Semaphore::timed_down), but expressed as a
    /// relative duration from now.
    pub fn down_timeout(&self, timeout: Duration) -> bool {
        self.timed_down(scheduler::deadline_in(timeout))
    }

    /// Releases a unit, waking the longest-waiting blocked thread if any,
    /// otherwise incrementing the count.
    pub fn up(&self) {
        let scheduler = scheduler::current();
        let mut guard = self.state.lock();
        match guard.queue.pop_front() {
            Some(waiter) => {
                // The freed unit is handed directly to `waiter`; `count`
                // stays at zero so a racing `try_down` cannot steal it.
                drop(guard);
                scheduler.make_runnable(waiter);
            }
            None => guard.count += 1,
        }
    }

    /// Returns the current count. Racy with concurrent `down`/`up`; intended
    /// for diagnostics and tests, not for synchronization decisions.
    pub fn count(&self) -> usize {
        self.state.lock().count
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        debug_assert!(
            self.state.get_mut().queue.is_empty(),
            "Semaphore dropped while threads were still waiting on it"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_down_respects_count() {
        let sem = Semaphore::new(1);
        assert!(sem.try_down());
        assert!(!sem.try_down());
        sem.up();
        assert!(sem.try_down());
    }

    #[test]
    fn up_without_waiters_increments_count() {
        let sem = Semaphore::new(0);
        sem.up();
        sem.up();
        assert_eq!(sem.count(), 2);
    }

    #[test]
    fn down_then_up_round_trips() {
        let sem = Semaphore::new(1);
        sem.down();
        assert_eq!(sem.count(), 0);
        sem.up();
        assert_eq!(sem.count(), 1);
    }
}
