//! The pluggable "2LS" (second-level scheduler) contract.
//!
//! Every blocking primitive in this crate is written against the
//! [`Scheduler`] trait only; it never touches an OS thread directly. A real
//! M:N runtime installs its own [`Scheduler`] (and, for the timed variants,
//! its own [`AlarmService`]) once at process startup via [`install`] /
//! [`install_alarm_service`]. If nothing is installed, [`current`] and
//! [`current_alarms`] lazily fall back to [`StdScheduler`] /
//! [`StdAlarmService`], a reference implementation that multiplexes one
//! user thread per OS thread and is what this crate's own tests run
//! against.

use crate::error::{Error, ErrorKind, Result};
use log::trace;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Opaque identity of a user thread, as handed out by a [`Scheduler`].
///
/// A thread is linked into at most one [`WaitQueue`](crate::wait_queue::WaitQueue)
/// at any time; that invariant is owned by the primitives in this crate, not
/// by `ThreadId` itself.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ThreadId(pub(crate) u64);

/// Why a thread blocked, passed to [`Scheduler::thread_has_blocked`].
///
/// Tagged variants are preferable to raw integer reason codes: they are
/// self-documenting in a trace log and can't be confused with an unrelated
/// numeric code from another subsystem.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum BlockReason {
    /// Blocked in [`Semaphore::down`](crate::semaphore::Semaphore::down).
    Semaphore,
    /// Blocked in [`Mutex::lock`](crate::mutex::Mutex::lock).
    Mutex,
    /// Blocked in [`RecursiveMutex::lock`](crate::rmutex::RecursiveMutex::lock).
    RecursiveMutex,
    /// Blocked in [`Condvar::wait`](crate::condvar::Condvar::wait).
    Condvar,
    /// Blocked in [`RwLock::read`](crate::rwlock::RwLock::read).
    RwLockRead,
    /// Blocked in [`RwLock::write`](crate::rwlock::RwLock::write).
    RwLockWrite,
}

/// The contract a second-level scheduler must provide.
///
/// # Contract
///
/// - [`yield_now`](Scheduler::yield_now) must run `callback` exactly once,
///   "on the scheduler stack", with the calling thread already quiescent
///   (i.e. safe to link onto a wait queue), and must not return to the
///   caller until that thread has subsequently been made runnable again via
///   [`make_runnable`](Scheduler::make_runnable).
/// - [`thread_has_blocked`](Scheduler::thread_has_blocked) must be called
///   (by `callback`, not by the scheduler) strictly before the primitive's
///   own internal lock is released, so that a concurrent wake can never
///   observe a thread as "about to block" without the scheduler already
///   knowing it has blocked.
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Returns the identity of the calling thread, registering it with the
    /// scheduler on first use if necessary.
    fn current_thread(&self) -> ThreadId;

    /// Notifies the scheduler that `thread` has blocked for `reason`.
    ///
    /// Must be called before the caller's internal spinlock is dropped; see
    /// the trait-level contract.
    fn thread_has_blocked(&self, thread: ThreadId, reason: BlockReason);

    /// Makes a previously-blocked thread runnable again.
    fn make_runnable(&self, thread: ThreadId);

    /// Yields the current thread to the scheduler, running `callback` once
    /// the thread is quiescent, and does not return until the thread has
    /// been made runnable again.
    fn yield_now(&self, callback: Box<dyn FnOnce() + Send + '_>);

    /// Panics if called from a context that forbids yielding (for example,
    /// a signal handler or an interrupt context in a real 2LS). The default
    /// implementation never forbids blocking.
    fn assert_can_block(&self) {}
}

/// A single pending or completed alarm, returned by [`AlarmService::arm_abs`].
pub struct AlarmHandle {
    inner: Arc<AlarmInner>,
}

impl fmt::Debug for AlarmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlarmHandle").finish_non_exhaustive()
    }
}

struct AlarmInner {
    state: parking_lot::Mutex<AlarmState>,
}

#[derive(Default)]
struct AlarmState {
    fired: bool,
    cancelled: bool,
}

/// The platform contract for absolute-deadline timeouts.
///
/// Consumed by [`crate::timeout`] to implement every primitive's `timed_*`
/// variant. [`cancel`](AlarmService::cancel) must be synchronous with
/// respect to the handler: it only returns once the alarm is either
/// guaranteed never to fire, or has already finished running its callback.
/// This is what lets [`crate::timeout::Timeout`] guarantee that exactly one
/// of {signal, timeout} wins a given wait.
pub trait AlarmService: Send + Sync + fmt::Debug {
    /// Arms an alarm that invokes `callback` at or after the absolute time
    /// `at`, unless cancelled first.
    fn arm_abs(&self, at: Instant, callback: Box<dyn FnOnce() + Send>) -> AlarmHandle;

    /// Cancels a previously-armed alarm. Blocks until the alarm is either
    /// cancelled before firing, or its handler has run to completion.
    /// Returns whether the alarm was cancelled before it fired.
    fn cancel(&self, handle: AlarmHandle) -> bool;
}

static SCHEDULER: OnceLock<Arc<dyn Scheduler>> = OnceLock::new();
static ALARMS: OnceLock<Arc<dyn AlarmService>> = OnceLock::new();

/// Installs the process-wide [`Scheduler`].
///
/// Must be called at most once, before any primitive in this crate is used
/// (primitives that run first implicitly install [`StdScheduler`] as a
/// fallback). Intended to be called once by a real 2LS during startup.
pub fn install(scheduler: Arc<dyn Scheduler>) -> Result<()> {
    SCHEDULER
        .set(scheduler)
        .map_err(|_| Error::new(ErrorKind::SchedulerAlreadyInstalled, "install() called twice"))
}

/// Installs the process-wide [`AlarmService`]. See [`install`].
pub fn install_alarm_service(alarms: Arc<dyn AlarmService>) -> Result<()> {
    ALARMS.set(alarms).map_err(|_| {
        Error::new(
            ErrorKind::SchedulerAlreadyInstalled,
            "install_alarm_service() called twice",
        )
    })
}

/// Returns the installed [`Scheduler`], or lazily installs and returns
/// [`StdScheduler`] if none has been installed yet.
pub fn current() -> Arc<dyn Scheduler> {
    SCHEDULER
        .get_or_init(|| Arc::new(StdScheduler::new()) as Arc<dyn Scheduler>)
        .clone()
}

/// Returns the installed [`AlarmService`], or lazily installs and returns
/// [`StdAlarmService`] if none has been installed yet.
pub fn current_alarms() -> Arc<dyn AlarmService> {
    ALARMS
        .get_or_init(|| Arc::new(StdAlarmService::new()) as Arc<dyn AlarmService>)
        .clone()
}

// ---------------------------------------------------------------------
// Reference scheduler: one user thread per OS thread.
// ---------------------------------------------------------------------

/// A park slot used to suspend and resume a single OS thread without the
/// spurious-wakeup hazard of raw `std::thread::park`/`unpark`: the flag is
/// only ever flipped under `lock`, so a [`StdScheduler::make_runnable`] that
/// races ahead of the matching `yield_now` is never lost.
struct ParkSlot {
    lock: parking_lot::Mutex<bool>,
    cvar: parking_lot::Condvar,
}

impl ParkSlot {
    fn new() -> Self {
        Self {
            lock: parking_lot::Mutex::new(false),
            cvar: parking_lot::Condvar::new(),
        }
    }
}

thread_local! {
    static LOCAL_ID: Cell<Option<ThreadId>> = Cell::new(None);
}

/// Reference [`Scheduler`] that runs every user thread as its own OS thread.
///
/// This is the scheduler this crate's own test suite runs against. It is
/// also a reasonable way to embed these primitives directly on top of
/// `std::thread` without writing a real M:N runtime.
pub struct StdScheduler {
    next_id: AtomicU64,
    slots: parking_lot::Mutex<HashMap<ThreadId, Arc<ParkSlot>>>,
}

impl fmt::Debug for StdScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler").finish_non_exhaustive()
    }
}

impl Default for StdScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl StdScheduler {
    /// Creates a new, empty reference scheduler.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            slots: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn slot_for(&self, thread: ThreadId) -> Arc<ParkSlot> {
        self.slots
            .lock()
            .entry(thread)
            .or_insert_with(|| Arc::new(ParkSlot::new()))
            .clone()
    }
}

impl Scheduler for StdScheduler {
    fn current_thread(&self) -> ThreadId {
        LOCAL_ID.with(|cell| {
            if let Some(id) = cell.get() {
                return id;
            }
            let id = ThreadId(self.next_id.fetch_add(1, Ordering::Relaxed));
            cell.set(Some(id));
            self.slots.lock().insert(id, Arc::new(ParkSlot::new()));
            id
        })
    }

    fn thread_has_blocked(&self, thread: ThreadId, reason: BlockReason) {
        trace!("thread {:?} blocked: {:?}", thread, reason);
    }

    fn make_runnable(&self, thread: ThreadId) {
        trace!("thread {:?} made runnable", thread);
        let slot = self.slot_for(thread);
        let mut runnable = slot.lock.lock();
        *runnable = true;
        slot.cvar.notify_one();
    }

    fn yield_now(&self, callback: Box<dyn FnOnce() + Send + '_>) {
        let thread = self.current_thread();
        let slot = self.slot_for(thread);

        // Acquire the park slot's lock *before* running `callback`: this is
        // what prevents a concurrent `make_runnable` from being lost between
        // the primitive enqueuing this thread and this thread actually
        // starting to wait on the condvar below.
        let mut runnable = slot.lock.lock();
        *runnable = false;
        callback();
        while !*runnable {
            slot.cvar.wait(&mut runnable);
        }
    }
}

/// Reference [`AlarmService`] that spawns one short-lived OS thread per
/// armed alarm and sleeps until the deadline.
#[derive(Debug, Default)]
pub struct StdAlarmService;

impl StdAlarmService {
    /// Creates a new reference alarm service.
    pub fn new() -> Self {
        Self
    }
}

impl AlarmService for StdAlarmService {
    fn arm_abs(&self, at: Instant, callback: Box<dyn FnOnce() + Send>) -> AlarmHandle {
        let inner = Arc::new(AlarmInner {
            state: parking_lot::Mutex::new(AlarmState::default()),
        });
        let inner2 = inner.clone();

        std::thread::spawn(move || {
            let now = Instant::now();
            if at > now {
                std::thread::sleep(at - now);
            }

            let mut state = inner2.state.lock();
            if state.cancelled {
                return;
            }
            // Run the handler while still holding the lock: this is what
            // makes `cancel` block until an in-flight handler has finished,
            // per the `AlarmService` contract.
            callback();
            state.fired = true;
        });

        AlarmHandle { inner }
    }

    fn cancel(&self, handle: AlarmHandle) -> bool {
        let mut state = handle.inner.state.lock();
        if state.fired {
            return false;
        }
        state.cancelled = true;
        true
    }
}

/// Convenience used by timed variants: the absolute deadline `duration` from
/// now, expressed as an [`Instant`] (the platform's monotonic clock).
pub fn deadline_in(duration: Duration) -> Instant {
    Instant::now() + duration
}

static_assertions::assert_impl_all!(StdScheduler: Send, Sync);
static_assertions::assert_impl_all!(StdAlarmService: Send, Sync);
static_assertions::assert_impl_all!(AtomicBool: Send, Sync);
