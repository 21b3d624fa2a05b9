use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::TimerHandle;

/// A callback scheduled on a [`TimerService`].
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Schedules callbacks to run once after a delay.
///
/// Implementations decide which thread runs the callback. Callers must not assume the callback
/// runs on any particular thread and must not assume it runs promptly after the delay elapses.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use delayer::{ManualTimer, TimerService};
///
/// fn arm(timer: &dyn TimerService) -> delayer::TimerHandle {
///     timer.schedule(Duration::from_secs(5), Box::new(|| println!("too late")))
/// }
///
/// let timer: Arc<dyn TimerService> = Arc::new(ManualTimer::new());
/// let handle = arm(timer.as_ref());
///
/// // Nobody will see the message.
/// assert!(handle.cancel());
/// ```
pub trait TimerService: Send + Sync + Debug {
    /// Schedules `callback` to run once after `delay` has elapsed.
    ///
    /// The returned handle can be used to deactivate the callback before it starts running.
    /// Dropping the handle does not cancel the callback.
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
}

impl<T> TimerService for Arc<T>
where
    T: TimerService + ?Sized,
{
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        self.as_ref().schedule(delay, callback)
    }
}
