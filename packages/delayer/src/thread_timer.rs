//! Real-clock timer backed by a dedicated background thread.

use std::any::type_name;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{TimerCallback, TimerHandle, TimerQueue, TimerService};

const DEFAULT_THREAD_NAME: &str = "delayer";

/// A [`TimerService`] that runs callbacks on a dedicated background thread.
///
/// The background thread is started on the first call to [`schedule()`][TimerService::schedule],
/// so a timer that is never used costs nothing beyond its allocation.
///
/// Callbacks run one at a time, in deadline order. A long-running callback delays all callbacks
/// scheduled after it, so callbacks are expected to be short.
///
/// Cancelled callbacks are removed from the queue immediately instead of lingering until their
/// deadline.
///
/// # Lifetime
///
/// When the timer is dropped, the background thread is signaled to stop and the drop blocks until
/// it has exited. Callbacks that have not fired by then are discarded without running.
///
/// # Example
///
/// ```rust
/// use std::sync::mpsc;
/// use std::time::Duration;
///
/// use delayer::{ThreadTimer, TimerService};
///
/// let timer = ThreadTimer::new();
/// let (tx, rx) = mpsc::channel();
///
/// let _handle = timer.schedule(
///     Duration::from_millis(10),
///     Box::new(move || tx.send("fired").unwrap()),
/// );
///
/// assert_eq!(rx.recv().unwrap(), "fired");
/// ```
pub struct ThreadTimer {
    queue: Arc<TimerQueue>,
    origin: Instant,
    thread_name: String,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadTimer {
    /// Creates a new timer with default settings.
    ///
    /// Use [`ThreadTimer::builder()`] for custom configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a builder for configuring the timer.
    #[must_use]
    pub fn builder() -> ThreadTimerBuilder {
        ThreadTimerBuilder::new()
    }

    /// Number of callbacks waiting for their deadline.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    fn ensure_worker_spawned(&self) {
        let mut worker = self.worker.lock();

        if worker.is_some() {
            return;
        }

        let queue = Arc::clone(&self.queue);
        let origin = self.origin;

        let handle = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                debug!("timer thread started");
                worker_loop(&queue, origin);
                debug!("timer thread exiting");
            })
            .expect("failed to spawn timer thread: thread spawning failure is not supported");

        *worker = Some(handle);
    }
}

fn worker_loop(queue: &TimerQueue, origin: Instant) {
    while let Some(callback) = queue.pop_due_blocking(|| origin.elapsed()) {
        trace!(elapsed = ?origin.elapsed(), "timer callback firing");

        // A panicking callback must not take down the timer, as every other callback
        // scheduled on this timer would silently never fire.
        if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
            warn!("timer callback panicked; the panic was discarded");
        }
    }
}

impl TimerService for ThreadTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        self.ensure_worker_spawned();

        let deadline = self
            .origin
            .elapsed()
            .checked_add(delay)
            .unwrap_or(Duration::MAX);

        let key = self.queue.insert(deadline, callback);

        trace!(?delay, "timer callback scheduled");

        TimerHandle::new(&self.queue, key)
    }
}

impl Default for ThreadTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.queue.shutdown();

        let Some(handle) = self.worker.get_mut().take() else {
            return;
        };

        // The last reference to the timer may be released by one of its own callbacks,
        // in which case the thread is already on its way out and cannot join itself.
        if handle.thread().id() == thread::current().id() {
            return;
        }

        if let Err(payload) = handle.join() {
            // Callbacks run inside a panic trap, so this means the timer itself is broken.
            panic::resume_unwind(payload);
        }
    }
}

impl fmt::Debug for ThreadTimer {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("thread_name", &self.thread_name)
            .field("started", &self.worker.lock().is_some())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring a [`ThreadTimer`].
#[derive(Debug)]
pub struct ThreadTimerBuilder {
    thread_name: String,
}

impl ThreadTimerBuilder {
    fn new() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }

    /// Sets the name of the background thread.
    ///
    /// Default is `delayer`.
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Builds the timer with the configured settings.
    #[must_use]
    pub fn build(self) -> ThreadTimer {
        ThreadTimer {
            queue: Arc::new(TimerQueue::new()),
            origin: Instant::now(),
            thread_name: self.thread_name,
            worker: Mutex::new(None),
        }
    }
}
