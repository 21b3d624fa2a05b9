use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::{TimerCallback, TimerHandle, TimerQueue, TimerService};

/// A [`TimerService`] driven by a virtual clock that only moves when told to.
///
/// Time starts at zero. Calling [`advance()`][Self::advance] moves the clock forward and runs
/// every callback that has become due, synchronously on the calling thread, in deadline order.
/// A callback scheduled with a zero delay runs on the next call to `advance()`.
///
/// This makes code that races timeouts against other events testable without sleeping.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use delayer::{ManualTimer, TimerService};
///
/// let timer = ManualTimer::new();
/// let handle = timer.schedule(Duration::from_millis(50), Box::new(|| {}));
///
/// timer.advance(Duration::from_millis(10));
/// assert!(handle.cancel());
///
/// timer.advance(Duration::from_millis(100));
/// assert_eq!(timer.pending_count(), 0);
/// ```
pub struct ManualTimer {
    queue: Arc<TimerQueue>,
    now: Mutex<Duration>,
}

impl ManualTimer {
    /// Creates a timer whose virtual clock starts at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Arc::new(TimerQueue::new()),
            now: Mutex::new(Duration::ZERO),
        }
    }

    /// Current reading of the virtual clock.
    #[must_use]
    pub fn now(&self) -> Duration {
        *self.now.lock()
    }

    /// Number of callbacks waiting for their deadline.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Moves the virtual clock forward and runs every callback that became due.
    ///
    /// Callbacks run on the calling thread. Callbacks that schedule new callbacks due at or
    /// before the new clock reading see those run as part of the same call.
    pub fn advance(&self, by: Duration) {
        let target = {
            let mut now = self.now.lock();
            *now = now.saturating_add(by);
            *now
        };

        trace!(now = ?target, "virtual clock advanced");

        while let Some(callback) = self.queue.pop_due(target) {
            callback();
        }
    }
}

impl TimerService for ManualTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let deadline = self.now().saturating_add(delay);
        let key = self.queue.insert(deadline, callback);

        TimerHandle::new(&self.queue, key)
    }
}

impl Default for ManualTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualTimer {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("now", &self.now())
            .field("queue", &self.queue)
            .finish()
    }
}
