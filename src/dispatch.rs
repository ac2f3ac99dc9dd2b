//! Job dispatch: the worker pool that runs firing jobs off the tick path.
//!
//! The tick loop never executes job bodies. When an entry comes due it is
//! handed to the [`Dispatcher`], a fixed-size pool of named OS threads
//! draining a lock-free queue. Firing is fire-and-forget: the tick loop does
//! not wait for the invocation, so a slow job delays nothing but itself.
//!
//! # Invocation contract
//!
//! The tick path claims the entry's running flag (the singleton guard)
//! before enqueueing; the worker releases it when the invocation finishes.
//! A worker wraps every job body in `catch_unwind`: a panic is recovered,
//! reported through the configured hook (or logged), and leaves the entry
//! scheduled. Returning [`JobFlow::Exit`] closes the entry.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::entry::{Entry, EntryId, JobFlow};

/// Callback invoked when a job body panics.
///
/// Receives the entry's identity and the recovered panic message. The hook
/// runs on the worker thread that recovered the panic; it must not panic
/// itself.
pub type PanicHook = Arc<dyn Fn(EntryId, &PanicPayload) + Send + Sync>;

/// A recovered panic from a job body, reduced to a printable message.
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    pub(crate) fn new(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }

    /// The panic message, best-effort.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PanicPayload").field(&self.message).finish()
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

struct DispatcherInner {
    queue: SegQueue<Arc<Entry>>,
    shutdown: AtomicBool,
    /// Mutex paired with `condvar` for worker parking.
    mutex: Mutex<()>,
    condvar: Condvar,
    /// Workers that have not yet exited their loop.
    active: AtomicUsize,
    panic_hook: Option<PanicHook>,
}

/// Fixed-size worker pool executing job invocations.
pub(crate) struct Dispatcher {
    inner: Arc<DispatcherInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers.lock().len())
            .field("pending", &self.inner.queue.len())
            .field("shutdown", &self.inner.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

impl Dispatcher {
    /// Spawns `threads` named workers draining the dispatch queue.
    pub(crate) fn new(threads: usize, name_prefix: &str, panic_hook: Option<PanicHook>) -> Self {
        debug_assert!(threads >= 1);
        let inner = Arc::new(DispatcherInner {
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            active: AtomicUsize::new(0),
            panic_hook,
        });

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let inner = Arc::clone(&inner);
            inner.active.fetch_add(1, Ordering::Release);
            let name = format!("{name_prefix}-worker-{index}");
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || {
                    worker_loop(&inner);
                    inner.active.fetch_sub(1, Ordering::Release);
                })
                .expect("failed to spawn dispatch worker");
            workers.push(handle);
        }

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Enqueues one invocation of `entry`.
    ///
    /// The caller has already claimed the entry's running flag via
    /// [`Entry::try_acquire_run`]; the worker releases it.
    pub(crate) fn dispatch(&self, entry: Arc<Entry>) {
        self.inner.queue.push(entry);
        let _guard = self.inner.mutex.lock();
        self.inner.condvar.notify_one();
    }

    /// Number of invocations queued but not yet picked up.
    pub(crate) fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Stops accepting work implicitly (the timer stops dispatching), lets
    /// workers drain the queue, and waits up to `timeout` for them to exit.
    ///
    /// Returns true if every worker exited and was joined. A worker stuck
    /// in a job body that never returns is detached instead of blocking
    /// the caller; it finishes (or not) on its own. Idempotent.
    pub(crate) fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.inner.mutex.lock();
            self.inner.condvar.notify_all();
        }

        // Workers decrement `active` as they exit the loop; join only once
        // all have, so a stalled job can never block shutdown.
        let deadline = Instant::now() + timeout;
        while self.inner.active.load(Ordering::Acquire) > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let stalled = self.inner.active.load(Ordering::Relaxed);
                // Detach: drop the handles rather than wait forever.
                self.workers.lock().clear();
                tracing::warn!(stalled, "dispatch workers still busy at shutdown; detaching");
                return false;
            }
            {
                let _guard = self.inner.mutex.lock();
                self.inner.condvar.notify_all();
            }
            thread::sleep(Duration::from_millis(5).min(remaining));
        }

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        true
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Already shut down (or detached): nothing left to wait for.
        if self.workers.lock().is_empty() {
            return;
        }
        self.shutdown(crate::config::DEFAULT_SHUTDOWN_TIMEOUT);
    }
}

fn worker_loop(inner: &DispatcherInner) {
    loop {
        while let Some(entry) = inner.queue.pop() {
            run_entry(inner, &entry);
        }

        // Re-check under the lock so a push between the failed pop and the
        // wait cannot strand its notification.
        let mut guard = inner.mutex.lock();
        if inner.shutdown.load(Ordering::Acquire) {
            drop(guard);
            // Drain what arrived before shutdown flipped.
            while let Some(entry) = inner.queue.pop() {
                run_entry(inner, &entry);
            }
            break;
        }
        if inner.queue.is_empty() {
            inner.condvar.wait(&mut guard);
        }
    }
}

/// Runs one invocation: job body under `catch_unwind`, then flow handling
/// and release of the running flag.
fn run_entry(inner: &DispatcherInner, entry: &Arc<Entry>) {
    let job = Arc::clone(entry.job());
    let outcome = catch_unwind(AssertUnwindSafe(move || job()));

    match outcome {
        Ok(JobFlow::Continue) => {}
        Ok(JobFlow::Exit) => {
            tracing::debug!(entry = %entry.id(), "job requested exit");
            entry.close();
        }
        Err(payload) => {
            let payload = PanicPayload::new(payload.as_ref());
            if let Some(hook) = &inner.panic_hook {
                hook(entry.id(), &payload);
            } else {
                tracing::error!(entry = %entry.id(), panic = %payload, "job panicked");
            }
        }
    }

    entry.finish_run();
}
