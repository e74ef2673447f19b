//! Binds an absolute-time alarm to a waiting thread so a timed sleeper is
//! extracted from its wait queue exactly once (spec.md §4.2).
//!
//! `Timeout` is the "timeout blob" of spec.md §3: it is always stack-
//! allocated by the waiter and never outlives the call that created it,
//! because [`Timeout::cancel`] blocks until the armed alarm is either
//! cancelled before firing or has finished running its handler.

use crate::scheduler::{self, AlarmHandle, ThreadId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A single in-flight timed wait.
pub(crate) struct Timeout {
    timed_out: Arc<AtomicBool>,
    handle: AlarmHandle,
}

impl Timeout {
    /// Arms an alarm for `thread` at the absolute deadline `at`. When (and
    /// only when) the alarm fires before being cancelled, `try_remove` is
    /// invoked; it must acquire the primitive's own lock, call
    /// [`get_specific`](crate::wait_queue::WaitQueue::get_specific) for
    /// `thread`, and report whether the thread was still enqueued (i.e. has
    /// now been removed by this call). If it was, the thread is made
    /// runnable by this helper — the primitive's `timed_*` method does not
    /// need to.
    ///
    /// # Safety
    ///
    /// `try_remove` closes over the primitive's internal state without
    /// borrow-checked lifetimes (the alarm runs on an unrelated thread, with
    /// no scope to tie its lifetime to). The caller must guarantee that the
    /// primitive outlives every call to [`Timeout::cancel`] that could still
    /// be pending for this alarm — in practice, that the `Timeout` returned
    /// here is cancelled before the primitive referenced by `try_remove` is
    /// dropped or moved. Every `timed_*` method in this crate upholds this
    /// by never returning before calling `cancel`.
    pub(crate) unsafe fn arm(
        thread: ThreadId,
        at: Instant,
        try_remove: impl FnOnce() -> bool + Send + 'static,
    ) -> Self {
        let sched = scheduler::current();
        let timed_out = Arc::new(AtomicBool::new(false));
        let timed_out_in_handler = timed_out.clone();

        let handle = scheduler::current_alarms().arm_abs(
            at,
            Box::new(move || {
                if try_remove() {
                    timed_out_in_handler.store(true, Ordering::SeqCst);
                    sched.make_runnable(thread);
                }
            }),
        );

        Timeout { timed_out, handle }
    }

    /// Cancels the alarm and reports whether it won the race, i.e. whether
    /// the wait timed out rather than being satisfied by a signal/unlock.
    ///
    /// Blocks until the alarm is either cancelled before firing, or has
    /// finished running `try_remove` and (if it found the thread) called
    /// `make_runnable`. This is what guarantees exactly one of
    /// {signal, timeout} resolves a given wait.
    pub(crate) fn cancel(self) -> bool {
        scheduler::current_alarms().cancel(self.handle);
        self.timed_out.load(Ordering::SeqCst)
    }
}
