//! The pluggable wait-queue abstraction ("`sync_t`" in spec terms).
//!
//! Every primitive in this crate stores its blocked threads in a
//! `Box<dyn WaitQueue>`, created through the process-wide
//! [`WaitQueueFactory`]. A 2LS that wants priority queues, per-core queues,
//! or anything else can override the factory with [`install_factory`]; the
//! default factory produces a plain FIFO.
//!
//! Unlike the C original, `init`/`destroy` are not separate operations here:
//! construction is `Default`/`Box::new`, and destruction is `Drop`. Each
//! primitive's `Drop` impl asserts the queue is empty before it goes away,
//! which is the same "destroy requires empty" invariant spec.md §3
//! describes, expressed through the type system rather than through a
//! fallible `destroy` call (see spec.md §9, Design Notes).

use crate::error::{Error, ErrorKind, Result};
use crate::scheduler::ThreadId;
use std::collections::VecDeque;
use std::fmt;
use std::sync::OnceLock;

/// An opaque, ordered container of blocked threads.
///
/// `get_specific` is the operation timeout cancellation depends on: it must
/// scan for a specific thread and remove it if present, reporting whether it
/// was found, so that a timed-out waiter can be extracted exactly once even
/// if a concurrent wake is racing to pop the same thread from the front.
pub trait WaitQueue: Send + fmt::Debug {
    /// Appends `thread` to the queue.
    fn enqueue(&mut self, thread: ThreadId);

    /// Removes and returns the next thread to wake, in this queue's chosen
    /// order (FIFO by default).
    fn pop_front(&mut self) -> Option<ThreadId>;

    /// Scans for `thread`, removing it if present. Returns whether it was
    /// found. Used by timeout cancellation to win the race against a
    /// concurrent wake-side pop, exactly once.
    fn get_specific(&mut self, thread: ThreadId) -> bool;

    /// Empties the queue, returning everything that was in it, in wake
    /// order. Used by broadcast-style wakeups to minimize the time the
    /// primitive's own lock is held: the queue is drained under the lock,
    /// then the drained threads are woken outside it.
    fn drain(&mut self) -> Vec<ThreadId>;

    /// Returns whether the queue currently holds no threads.
    fn is_empty(&self) -> bool;

    /// Returns the number of threads currently enqueued.
    fn len(&self) -> usize;
}

/// The default wait-queue implementation: first-in-first-out.
#[derive(Debug, Default)]
pub struct FifoWaitQueue(VecDeque<ThreadId>);

impl FifoWaitQueue {
    /// Creates a new, empty FIFO wait queue.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitQueue for FifoWaitQueue {
    fn enqueue(&mut self, thread: ThreadId) {
        self.0.push_back(thread);
    }

    fn pop_front(&mut self) -> Option<ThreadId> {
        self.0.pop_front()
    }

    fn get_specific(&mut self, thread: ThreadId) -> bool {
        if let Some(pos) = self.0.iter().position(|t| *t == thread) {
            self.0.remove(pos);
            true
        } else {
            false
        }
    }

    fn drain(&mut self) -> Vec<ThreadId> {
        self.0.drain(..).collect()
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

/// A factory used to create a fresh [`WaitQueue`] for each new primitive.
pub type WaitQueueFactory = fn() -> Box<dyn WaitQueue>;

static FACTORY: OnceLock<WaitQueueFactory> = OnceLock::new();

fn default_factory() -> Box<dyn WaitQueue> {
    Box::new(FifoWaitQueue::new())
}

/// Overrides the process-wide [`WaitQueueFactory`].
///
/// Must be called before any primitive in this crate is constructed (any
/// primitive constructed first implicitly locks in the default FIFO
/// factory).
pub fn install_factory(factory: WaitQueueFactory) -> Result<()> {
    FACTORY.set(factory).map_err(|_| {
        Error::new(
            ErrorKind::SchedulerAlreadyInstalled,
            "install_factory() called twice",
        )
    })
}

/// Creates a new wait queue using the installed (or default FIFO) factory.
pub fn new_queue() -> Box<dyn WaitQueue> {
    let factory = *FACTORY.get_or_init(|| default_factory as WaitQueueFactory);
    factory()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = FifoWaitQueue::new();
        assert!(q.is_empty());
        q.enqueue(ThreadId(1));
        q.enqueue(ThreadId(2));
        q.enqueue(ThreadId(3));
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop_front(), Some(ThreadId(1)));
        assert_eq!(q.pop_front(), Some(ThreadId(2)));
        assert!(!q.is_empty());
        assert_eq!(q.pop_front(), Some(ThreadId(3)));
        assert!(q.is_empty());
        assert_eq!(q.pop_front(), None);
    }

    #[test]
    fn get_specific_removes_exactly_one() {
        let mut q = FifoWaitQueue::new();
        q.enqueue(ThreadId(1));
        q.enqueue(ThreadId(2));
        assert!(q.get_specific(ThreadId(1)));
        assert!(!q.get_specific(ThreadId(1)));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_front(), Some(ThreadId(2)));
    }

    #[test]
    fn drain_empties_in_order() {
        let mut q = FifoWaitQueue::new();
        q.enqueue(ThreadId(1));
        q.enqueue(ThreadId(2));
        let drained = q.drain();
        assert_eq!(drained, vec![ThreadId(1), ThreadId(2)]);
        assert!(q.is_empty());
    }
}
