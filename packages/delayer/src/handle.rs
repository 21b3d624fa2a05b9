use std::any::type_name;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::{TimerKey, TimerQueue};

/// Handle to one callback scheduled on a [`TimerService`][crate::TimerService].
///
/// The handle does not keep the timer alive. If the timer has been dropped, the callback is
/// gone and [`cancel()`][Self::cancel] simply returns `false`.
pub struct TimerHandle {
    queue: Weak<TimerQueue>,
    key: TimerKey,
}

impl TimerHandle {
    pub(crate) fn new(queue: &Arc<TimerQueue>, key: TimerKey) -> Self {
        Self {
            queue: Arc::downgrade(queue),
            key,
        }
    }

    /// Deactivates the callback if it has not started running yet.
    ///
    /// Returns `true` if this call deactivated the callback, in which case it is guaranteed
    /// never to run. Returns `false` if the callback already ran, is running right now or was
    /// already cancelled. A callback that is running is never interrupted.
    pub fn cancel(&self) -> bool {
        self.queue
            .upgrade()
            .is_some_and(|queue| queue.remove(self.key))
    }

    /// Whether the callback is still waiting for its deadline.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.queue
            .upgrade()
            .is_some_and(|queue| queue.contains(self.key))
    }

    /// When the callback is due, as an offset from the origin of the timer's clock.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.key.deadline()
    }
}

impl fmt::Debug for TimerHandle {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("deadline", &self.key.deadline())
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}
