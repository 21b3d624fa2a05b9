use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{CancellationRegistration, CancellationToken};

/// Lock plus condition, shared between a blocking primitive and the interrupt callbacks of
/// the threads blocked on it.
#[derive(Debug)]
pub(crate) struct Monitor<T> {
    state: Mutex<T>,
    condition: Condvar,
}

impl<T> Monitor<T>
where
    T: Send + 'static,
{
    pub(crate) fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            condition: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock()
    }

    /// Blocks until notified, a spurious wakeup or `deadline`, whichever comes first.
    pub(crate) fn wait(&self, guard: &mut MutexGuard<'_, T>, deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => {
                self.condition.wait_until(guard, deadline);
            }
            None => self.condition.wait(guard),
        }
    }

    pub(crate) fn notify_one(&self) {
        self.condition.notify_one();
    }

    pub(crate) fn notify_all(&self) {
        self.condition.notify_all();
    }

    /// Wakes every blocked thread so it can re-evaluate its exit conditions.
    ///
    /// The lock is taken first: a waiter checks its exit conditions under the lock and only
    /// releases it by blocking, so this can never slip in between the check and the block.
    pub(crate) fn wake_all(&self) {
        let _guard = self.state.lock();
        self.condition.notify_all();
    }

    /// Arranges for [`wake_all()`][Self::wake_all] to be called when `interrupt` is cancelled.
    ///
    /// Must be called before taking the lock, because a token that is already cancelled
    /// runs the callback right away.
    pub(crate) fn wake_all_on(
        self: &Arc<Self>,
        interrupt: &CancellationToken,
    ) -> CancellationRegistration {
        let monitor = Arc::clone(self);
        interrupt.register(move || monitor.wake_all())
    }
}
