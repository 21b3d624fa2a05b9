//! Manual-reset event with a lock-free fast path.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use scopeguard::defer;

use crate::{CancellationToken, Error, Monitor, Result, Timeout};

/// An event that stays signaled until explicitly reset, releasing every waiter while signaled.
///
/// Waiting on a signaled event is a single atomic load. Threads that find the event
/// non-signaled block until the next [`set()`][Self::set].
///
/// Every `set()` that finds blocked threads bumps a version number under the lock. A blocked
/// thread returns once the version differs from the one it saw when it started waiting, not
/// when it sees the flag. This way a `set()` immediately followed by a [`reset()`][Self::reset]
/// still releases every thread that was blocked at the time of the `set()`, while threads that
/// start waiting after the `reset()` block.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::thread;
///
/// use latchkey::{ManualResetEvent, Timeout};
///
/// let event = Arc::new(ManualResetEvent::new(false));
///
/// let waiter = {
///     let event = Arc::clone(&event);
///     thread::spawn(move || event.wait(Timeout::Infinite))
/// };
///
/// event.set();
/// assert!(waiter.join().unwrap());
///
/// event.reset();
/// assert!(!event.wait(Timeout::ZERO));
/// ```
pub struct ManualResetEvent {
    signaled: AtomicBool,

    // Number of threads that registered on the slow path and have not left it yet.
    // Lets `set()` skip the lock entirely when nobody is blocked.
    waiters: AtomicUsize,

    // The state under the lock is the set version.
    monitor: Arc<Monitor<u64>>,
}

impl ManualResetEvent {
    /// Creates an event in the given state.
    #[must_use]
    pub fn new(initially_signaled: bool) -> Self {
        Self {
            signaled: AtomicBool::new(initially_signaled),
            waiters: AtomicUsize::new(0),
            monitor: Arc::new(Monitor::new(0)),
        }
    }

    /// Whether the event is signaled right now.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.signaled.load(Ordering::SeqCst)
    }

    /// Blocks until the event is signaled or `timeout` elapses.
    ///
    /// Returns `false` if the timeout elapsed first. A zero timeout never blocks.
    pub fn wait(&self, timeout: impl Into<Timeout>) -> bool {
        // Without an interrupt source the wait cannot fail.
        self.wait_core(timeout.into(), None).unwrap_or(false)
    }

    /// Blocks until the event is signaled, `timeout` elapses or `interrupt` is cancelled.
    ///
    /// A signal that released this thread takes precedence over an interrupt that arrived at
    /// the same time. The token is not reset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] if `interrupt` was cancelled before the event was
    /// signaled.
    pub fn wait_interruptible(
        &self,
        timeout: impl Into<Timeout>,
        interrupt: &CancellationToken,
    ) -> Result<bool> {
        self.wait_core(timeout.into(), Some(interrupt))
    }

    fn wait_core(&self, timeout: Timeout, interrupt: Option<&CancellationToken>) -> Result<bool> {
        if self.is_set() {
            return Ok(true);
        }

        if timeout.is_zero() {
            return Ok(false);
        }

        let deadline = timeout.deadline_from(Instant::now());

        // Registered before taking the lock, since an already cancelled token runs the
        // wake-up callback immediately and that callback takes the lock.
        let _registration = interrupt.map(|token| self.monitor.wake_all_on(token));

        let mut version = self.monitor.lock();
        let started_at_version = *version;

        self.waiters.fetch_add(1, Ordering::SeqCst);
        defer! {
            self.waiters.fetch_sub(1, Ordering::SeqCst);
        }

        // SeqCst pairs the `waiters` increment above with this load, against the `signaled`
        // store and `waiters` load in `set()`: at least one side sees the other.
        if self.is_set() {
            return Ok(true);
        }

        loop {
            if interrupt.is_some_and(CancellationToken::is_cancelled) {
                return Err(Error::Interrupted);
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(false);
            }

            self.monitor.wait(&mut version, deadline);

            // The flag may already have been reset again by now. The version tells us that
            // a set happened while we were registered, which is what releases us.
            if *version != started_at_version {
                return Ok(true);
            }
        }
    }

    /// Signals the event, releasing all blocked threads and every future wait until reset.
    pub fn set(&self) {
        self.signaled.store(true, Ordering::SeqCst);

        if self.waiters.load(Ordering::SeqCst) == 0 {
            return;
        }

        let mut version = self.monitor.lock();

        // Waiters may have left while we were taking the lock.
        if self.waiters.load(Ordering::SeqCst) > 0 {
            *version = version.wrapping_add(1);
            self.monitor.notify_all();
        }
    }

    /// Returns the event to the non-signaled state.
    ///
    /// Threads already released by an earlier [`set()`][Self::set] stay released.
    pub fn reset(&self) {
        self.signaled.store(false, Ordering::SeqCst);
    }

    /// Number of threads blocked waiting for the event right now.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.waiters.load(Ordering::SeqCst)
    }
}

impl Default for ManualResetEvent {
    fn default() -> Self {
        Self::new(false)
    }
}

impl fmt::Debug for ManualResetEvent {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("signaled", &self.is_set())
            .field("waiters", &self.waiter_count())
            .finish_non_exhaustive()
    }
}
