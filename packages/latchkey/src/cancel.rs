//! Cooperative cancellation and interruption signal.

use std::any::type_name;
use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    callbacks: Mutex<CallbackList>,
}

#[derive(Default)]
struct CallbackList {
    next_id: u64,
    entries: BTreeMap<u64, Callback>,
}

/// A shared, one-way "please stop" signal.
///
/// Once [`cancel()`][Self::cancel] has been called, the token stays cancelled forever. All
/// clones of a token observe the same state.
///
/// The token plays two roles in this crate:
///
/// * Passed to a future-based wait (e.g. [`BooleanLatch::wait_async_with_cancel()`][1]), it
///   cancels that wait, which then resolves as cancelled.
/// * Passed to a blocking wait (e.g. [`Semaphore::acquire_interruptible()`][2]), it interrupts
///   the blocked thread, which then returns [`Error::Interrupted`][3] unless the wait had
///   already been satisfied. The primitives never clear the token, so the interruption stays
///   observable to the caller even when a result is returned instead.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// use latchkey::CancellationToken;
///
/// let token = CancellationToken::new();
/// let notified = Arc::new(AtomicBool::new(false));
///
/// let notified_clone = Arc::clone(&notified);
/// let _registration = token.register(move || notified_clone.store(true, Ordering::Relaxed));
///
/// token.clone().cancel();
///
/// assert!(token.is_cancelled());
/// assert!(notified.load(Ordering::Relaxed));
/// ```
///
/// [1]: crate::BooleanLatch::wait_async_with_cancel
/// [2]: crate::Semaphore::acquire_interruptible
/// [3]: crate::Error::Interrupted
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and runs every registered callback.
    ///
    /// Callbacks run on the calling thread, after the token has been marked as cancelled and
    /// outside of any internal lock, so a callback may freely use the token. Calling this on a
    /// token that is already cancelled does nothing.
    pub fn cancel(&self) {
        // Release pairs with the Acquire in `is_cancelled()` so whoever observes the flag
        // also observes everything the canceller did before cancelling.
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        let callbacks = mem::take(&mut self.inner.callbacks.lock().entries);

        for callback in callbacks.into_values() {
            callback();
        }
    }

    /// Whether [`cancel()`][Self::cancel] has been called on this token or any of its clones.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Registers a callback to run when the token is cancelled.
    ///
    /// If the token is already cancelled, the callback runs immediately on the calling thread.
    /// Dropping the returned registration unregisters the callback if it has not run yet.
    pub fn register(&self, callback: impl FnOnce() + Send + 'static) -> CancellationRegistration {
        {
            let mut callbacks = self.inner.callbacks.lock();

            // Checked under the lock: `cancel()` sets the flag before it takes the list, so
            // either we see the flag here or our entry is in the list it takes.
            if !self.is_cancelled() {
                let id = callbacks.next_id;
                callbacks.next_id = callbacks.next_id.wrapping_add(1);
                callbacks.entries.insert(id, Box::new(callback));

                return CancellationRegistration {
                    token: Arc::downgrade(&self.inner),
                    id: Some(id),
                };
            }
        }

        callback();

        CancellationRegistration {
            token: Weak::new(),
            id: None,
        }
    }

    #[cfg(test)]
    fn registered_count(&self) -> usize {
        self.inner.callbacks.lock().entries.len()
    }
}

impl fmt::Debug for CancellationToken {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Keeps a callback registered on a [`CancellationToken`].
///
/// Dropping the registration unregisters the callback. This is harmless if the callback
/// has already run.
#[must_use = "dropping the registration immediately unregisters the callback"]
pub struct CancellationRegistration {
    token: Weak<TokenInner>,
    id: Option<u64>,
}

impl Drop for CancellationRegistration {
    fn drop(&mut self) {
        let Some(id) = self.id else {
            return;
        };

        let Some(token) = self.token.upgrade() else {
            return;
        };

        let removed = token.callbacks.lock().entries.remove(&id);

        // Dropped outside the lock, as the callback may own the last reference to
        // something whose destructor touches this token.
        drop(removed);
    }
}

impl fmt::Debug for CancellationRegistration {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use static_assertions::assert_impl_all;
    use testing::with_watchdog;

    use super::*;

    assert_impl_all!(CancellationToken: Send, Sync, Clone);
    assert_impl_all!(CancellationRegistration: Send, Sync);

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn new_token_is_not_cancelled() {
        assert!(!CancellationToken::new().is_cancelled());
    }

    #[test]
    fn cancel_runs_each_callback_once() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let _first = token.register(counting(&counter));
        let _second = token.register(counting(&counter));

        token.cancel();
        token.cancel();

        assert_eq!(counter.load(Ordering::Relaxed), 2);
        assert_eq!(token.registered_count(), 0);
    }

    #[test]
    fn register_on_cancelled_token_runs_immediately() {
        let token = CancellationToken::new();
        token.cancel();

        let counter = Arc::new(AtomicUsize::new(0));
        let registration = token.register(counting(&counter));

        assert_eq!(counter.load(Ordering::Relaxed), 1);
        drop(registration);
    }

    #[test]
    fn dropped_registration_does_not_run() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        drop(token.register(counting(&counter)));
        assert_eq!(token.registered_count(), 0);

        token.cancel();

        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn registration_outliving_token_drops_cleanly() {
        let token = CancellationToken::new();
        let registration = token.register(|| {});

        drop(token);
        drop(registration);
    }

    #[test]
    fn callback_may_touch_token() {
        let token = CancellationToken::new();
        let token_clone = token.clone();

        let _registration = token.register(move || {
            assert!(token_clone.is_cancelled());
            // Registering from inside a callback must not deadlock.
            let _nested = token_clone.register(|| {});
        });

        token.cancel();
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn concurrent_register_and_cancel_run_every_callback_once() {
        with_watchdog(|| {
            for _ in 0..100 {
                let token = CancellationToken::new();
                let counter = Arc::new(AtomicUsize::new(0));

                let registrars = (0..4)
                    .map(|_| {
                        let token = token.clone();
                        let counter = Arc::clone(&counter);
                        thread::spawn(move || {
                            (0..10)
                                .map(|_| token.register(counting(&counter)))
                                .collect::<Vec<_>>()
                        })
                    })
                    .collect::<Vec<_>>();

                token.cancel();

                let registrations = registrars
                    .into_iter()
                    .map(|handle| handle.join().unwrap())
                    .collect::<Vec<_>>();

                assert_eq!(counter.load(Ordering::Relaxed), 40);
                drop(registrations);
            }
        });
    }
}
