//! Job entries: the descriptor and status machine for one scheduled job.
//!
//! An [`Entry`] is created by the scheduling API on [`crate::timer::Timer`]
//! and handed back to the caller as an `Arc<Entry>`. The handle controls the
//! job's lifecycle (`start`/`stop`/`close`) while the timer owns its position
//! in the wheels.
//!
//! # Status machine
//!
//! ```text
//! Ready --fires--> Ready (repeats left) | Closed (repeats exhausted)
//! Ready <--start/stop--> Stopped
//! any non-Closed --close()/JobFlow::Exit--> Closed (terminal)
//! ```
//!
//! "Running" is an orthogonal atomic flag covering one invocation, used only
//! to enforce the singleton guard. It never blocks a concurrently requested
//! status transition: `stop`/`close` apply to future firings while an
//! in-flight invocation runs to completion.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicI8, AtomicU64, Ordering};
use std::sync::Arc;

/// Sentinel repeat count meaning "fire forever".
pub const UNLIMITED_TIMES: i64 = i64::MAX;

/// Control value returned by a job body.
///
/// Returning [`JobFlow::Exit`] is the deliberate self-termination signal:
/// the dispatch wrapper closes the entry and no further firings occur. It is
/// always distinguished from a panic inside the job body, which is recovered
/// and leaves the entry scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFlow {
    /// Keep the entry scheduled for its next firing.
    Continue,
    /// Close the entry; equivalent to calling [`Entry::close`] from inside
    /// the job.
    Exit,
}

/// The callable invoked when an entry fires.
pub type Job = Arc<dyn Fn() -> JobFlow + Send + Sync + 'static>;

/// Opaque identity of an entry, stable for the job's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub(crate) u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// Lifecycle status of an entry.
///
/// The numeric values are part of the public contract:
/// `Ready = 0`, `Running = 1`, `Stopped = 2`, `Closed = -1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum Status {
    /// Scheduled and eligible to fire.
    Ready = 0,
    /// Named constant for an in-flight invocation. The status machine never
    /// stores this value; see the module docs on the orthogonal running flag.
    Running = 1,
    /// Anchored in place, skipped on every visit until restarted.
    Stopped = 2,
    /// Terminal; removed from its slot on the next visit.
    Closed = -1,
}

impl Status {
    /// Converts a raw status value back to a `Status`, if valid.
    #[must_use]
    pub const fn from_raw(raw: i8) -> Option<Self> {
        match raw {
            0 => Some(Self::Ready),
            1 => Some(Self::Running),
            2 => Some(Self::Stopped),
            -1 => Some(Self::Closed),
            _ => None,
        }
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn as_raw(self) -> i8 {
        self as i8
    }
}

/// Descriptor and status machine for one scheduled job.
///
/// Shared between the caller (lifecycle control) and the timer (placement
/// and dispatch). All mutable state is atomic; the wheels never need to
/// lock an entry.
pub struct Entry {
    id: EntryId,
    job: Job,
    /// Nominal recurrence period in base-tick units. Fixed at creation.
    interval_ticks: u64,
    singleton: AtomicBool,
    /// Concurrency guard, set for the duration of one invocation.
    running: AtomicBool,
    status: AtomicI8,
    times_left: AtomicI64,
    run_count: AtomicU64,
}

impl Entry {
    pub(crate) fn new(
        id: EntryId,
        job: Job,
        interval_ticks: u64,
        singleton: bool,
        times: i64,
        status: Status,
    ) -> Self {
        Self {
            id,
            job,
            interval_ticks,
            singleton: AtomicBool::new(singleton),
            running: AtomicBool::new(false),
            status: AtomicI8::new(status.as_raw()),
            times_left: AtomicI64::new(times),
            run_count: AtomicU64::new(0),
        }
    }

    /// Returns the entry's identity.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Returns the recurrence period in base-tick units.
    #[must_use]
    pub fn interval_ticks(&self) -> u64 {
        self.interval_ticks
    }

    /// Returns the current lifecycle status.
    #[must_use]
    pub fn status(&self) -> Status {
        Status::from_raw(self.status.load(Ordering::Acquire)).unwrap_or(Status::Closed)
    }

    /// Resumes a stopped entry on its original schedule.
    ///
    /// Returns true if the entry transitioned from `Stopped` to `Ready`.
    /// No interval recomputation happens: the entry fires on the next tick
    /// it was already due for.
    pub fn start(&self) -> bool {
        self.status
            .compare_exchange(
                Status::Stopped.as_raw(),
                Status::Ready.as_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Stops the entry: it stays anchored and is skipped on every visit.
    ///
    /// Returns true if the entry transitioned from `Ready` to `Stopped`.
    /// An already-dispatched invocation runs to completion regardless.
    pub fn stop(&self) -> bool {
        self.status
            .compare_exchange(
                Status::Ready.as_raw(),
                Status::Stopped.as_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Closes the entry. Terminal; it will be physically removed from its
    /// slot on the next visit.
    ///
    /// Returns true if the entry was not already closed.
    pub fn close(&self) -> bool {
        let prev = self.status.swap(Status::Closed.as_raw(), Ordering::AcqRel);
        let changed = prev != Status::Closed.as_raw();
        if changed {
            tracing::debug!(entry = %self.id, "entry closed");
        }
        changed
    }

    /// Returns true if the entry is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.status() == Status::Closed
    }

    /// Returns true if at most one concurrent invocation is permitted.
    #[must_use]
    pub fn is_singleton(&self) -> bool {
        self.singleton.load(Ordering::Acquire)
    }

    /// Enables or disables the singleton guard.
    pub fn set_singleton(&self, singleton: bool) {
        self.singleton.store(singleton, Ordering::Release);
    }

    /// Sets the number of firings left before the entry closes.
    pub fn set_times(&self, times: i64) {
        self.times_left.store(times, Ordering::Release);
    }

    /// Returns the number of firings left ([`UNLIMITED_TIMES`] if unbounded).
    #[must_use]
    pub fn times_left(&self) -> i64 {
        self.times_left.load(Ordering::Acquire)
    }

    /// Returns the number of completed invocations.
    #[must_use]
    pub fn run_count(&self) -> u64 {
        self.run_count.load(Ordering::Acquire)
    }

    /// Consumes one repeat, returning the count before the decrement.
    ///
    /// Unlimited entries are never decremented and always report
    /// [`UNLIMITED_TIMES`].
    pub(crate) fn take_repeat(&self) -> i64 {
        let current = self.times_left.load(Ordering::Acquire);
        if current == UNLIMITED_TIMES {
            return UNLIMITED_TIMES;
        }
        self.times_left.fetch_sub(1, Ordering::AcqRel)
    }

    /// Atomically claims the running flag for one invocation.
    ///
    /// For singleton entries a firing that finds the flag already set is
    /// silently skipped (the entry stays on schedule). Non-singleton
    /// entries always acquire; their flag is informational.
    pub(crate) fn try_acquire_run(&self) -> bool {
        if self.is_singleton() {
            !self.running.swap(true, Ordering::AcqRel)
        } else {
            self.running.store(true, Ordering::Release);
            true
        }
    }

    /// Clears the running flag and records a completed invocation.
    pub(crate) fn finish_run(&self) {
        self.run_count.fetch_add(1, Ordering::AcqRel);
        self.running.store(false, Ordering::Release);
    }

    /// Returns true if an invocation is currently in flight.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn job(&self) -> &Job {
        &self.job
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("interval_ticks", &self.interval_ticks)
            .field("status", &self.status())
            .field("singleton", &self.is_singleton())
            .field("times_left", &self.times_left())
            .field("run_count", &self.run_count())
            .finish_non_exhaustive()
    }
}
