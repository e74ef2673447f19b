//! A rendezvous point for a fixed number of threads, built from this
//! crate's own [`Mutex`](crate::mutex::Mutex) and
//! [`Condvar`](crate::condvar::Condvar).
//!
//! Not named in the core component table, but ambient POSIX-adjacent
//! surface: `pthread_barrier_t` is a sibling of the mutex/condvar/rwlock
//! trio the core does name, and costs nothing beyond what they already
//! provide.

use crate::condvar::Condvar;
use crate::mutex::Mutex;

#[derive(Debug)]
struct BarrierState {
    count: usize,
    generation_id: u64,
}

/// A synchronization point at which a fixed number of threads wait for
/// each other to arrive.
#[derive(Debug)]
pub struct Barrier {
    lock: Mutex<BarrierState>,
    cvar: Condvar,
    num_threads: usize,
}

impl Barrier {
    /// Creates a barrier that releases `n` waiting threads at a time.
    pub fn new(n: usize) -> Self {
        Self {
            lock: Mutex::new(BarrierState {
                count: 0,
                generation_id: 0,
            }),
            cvar: Condvar::new(),
            num_threads: n,
        }
    }

    /// Blocks until `n` threads (the count this barrier was created with)
    /// have called `wait`. Exactly one of them receives a result for which
    /// [`BarrierWaitResult::is_leader`] returns `true`.
    pub fn wait(&self) -> BarrierWaitResult {
        let mut guard = self.lock.lock();
        let local_gen = guard.generation_id;
        guard.count += 1;

        if guard.count < self.num_threads {
            while local_gen == guard.generation_id {
                guard = self.cvar.wait(guard);
            }
            BarrierWaitResult(false)
        } else {
            guard.count = 0;
            guard.generation_id = guard.generation_id.wrapping_add(1);
            self.cvar.broadcast();
            BarrierWaitResult(true)
        }
    }
}

/// The result of a [`Barrier::wait`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult(bool);

impl BarrierWaitResult {
    /// Returns whether this thread was selected as the leader — the one
    /// whose arrival released the rest of the barrier's generation.
    pub fn is_leader(&self) -> bool {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn releases_exactly_one_leader() {
        const N: usize = 8;
        let barrier = Arc::new(Barrier::new(N));
        let leaders = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let barrier = barrier.clone();
                let leaders = leaders.clone();
                std::thread::spawn(move || {
                    if barrier.wait().is_leader() {
                        leaders.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(leaders.load(Ordering::SeqCst), 1);
    }
}
