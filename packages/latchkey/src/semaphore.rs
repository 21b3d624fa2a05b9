//! Counting semaphore with a lock-free fast path.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use scopeguard::defer;

use crate::{CancellationToken, Error, Monitor, Result, Timeout};

/// A counting semaphore whose uncontended acquire and release never touch a lock.
///
/// Permits are taken with a compare-and-swap loop on an atomic counter. Only when no permit is
/// available does a thread register as a waiter and block on a condition. A release only takes
/// the lock when it observes registered waiters, and then wakes one waiter if only one can
/// proceed or all of them if several permits were released to several waiters.
///
/// There is no fairness guarantee: a thread arriving on the fast path may take a permit ahead
/// of a thread that has been blocked for a while.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use latchkey::{Semaphore, Timeout};
///
/// let semaphore = Semaphore::new(1);
///
/// assert!(semaphore.try_acquire());
/// assert!(!semaphore.acquire(Duration::from_millis(10)));
///
/// semaphore.release(1);
/// assert!(semaphore.acquire(Timeout::Infinite));
/// ```
pub struct Semaphore {
    permits: AtomicUsize,

    // Number of threads that registered on the slow path and have not left it yet.
    // Lets `release()` skip the lock entirely when nobody is blocked.
    waiters: AtomicUsize,

    monitor: Arc<Monitor<()>>,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            permits: AtomicUsize::new(permits),
            waiters: AtomicUsize::new(0),
            monitor: Arc::new(Monitor::new(())),
        }
    }

    /// Takes one permit if one is available right now, without blocking.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        // SeqCst: a waiter increments `waiters` and then reads `permits` here, while a releaser
        // writes `permits` and then reads `waiters`. Only a single total order over these four
        // accesses guarantees that at least one side sees the other.
        let mut observed = self.permits.load(Ordering::SeqCst);

        loop {
            if observed == 0 {
                return false;
            }

            match self.permits.compare_exchange_weak(
                observed,
                observed.wrapping_sub(1),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(current) => observed = current,
            }
        }
    }

    /// Takes one permit, blocking until one becomes available or `timeout` elapses.
    ///
    /// Returns `false` if the timeout elapsed first. A zero timeout never blocks.
    pub fn acquire(&self, timeout: impl Into<Timeout>) -> bool {
        // Without an interrupt source the wait cannot fail.
        self.acquire_core(timeout.into(), None).unwrap_or(false)
    }

    /// Takes one permit, blocking until one becomes available, `timeout` elapses or
    /// `interrupt` is cancelled.
    ///
    /// A waiter that is woken always tries to take a permit before it considers the timeout or
    /// the interrupt, so a permit released to it is never lost. The token is not reset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] if `interrupt` was cancelled while no permit was
    /// available. No permit has been taken in that case.
    pub fn acquire_interruptible(
        &self,
        timeout: impl Into<Timeout>,
        interrupt: &CancellationToken,
    ) -> Result<bool> {
        self.acquire_core(timeout.into(), Some(interrupt))
    }

    fn acquire_core(&self, timeout: Timeout, interrupt: Option<&CancellationToken>) -> Result<bool> {
        if self.try_acquire() {
            return Ok(true);
        }

        if timeout.is_zero() {
            return Ok(false);
        }

        let deadline = timeout.deadline_from(Instant::now());

        // Registered before taking the lock, since an already cancelled token runs the
        // wake-up callback immediately and that callback takes the lock.
        let _registration = interrupt.map(|token| self.monitor.wake_all_on(token));

        let mut guard = self.monitor.lock();

        self.waiters.fetch_add(1, Ordering::SeqCst);
        defer! {
            self.waiters.fetch_sub(1, Ordering::SeqCst);
        }

        loop {
            // Must come first after registering as a waiter, in case a release happened
            // before it could see us.
            if self.try_acquire() {
                return Ok(true);
            }

            if interrupt.is_some_and(CancellationToken::is_cancelled) {
                return Err(Error::Interrupted);
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(false);
            }

            self.monitor.wait(&mut guard, deadline);
        }
    }

    /// Returns `count` permits to the semaphore, waking blocked threads as needed.
    ///
    /// Releasing zero permits does nothing.
    pub fn release(&self, count: usize) {
        if count == 0 {
            return;
        }

        self.permits.fetch_add(count, Ordering::SeqCst);

        if self.waiters.load(Ordering::SeqCst) == 0 {
            return;
        }

        let _guard = self.monitor.lock();

        // Waiters may have left while we were taking the lock.
        let waiters = self.waiters.load(Ordering::SeqCst);

        if waiters == 0 {
            return;
        }

        if waiters == 1 || count == 1 {
            self.monitor.notify_one();
        } else {
            self.monitor.notify_all();
        }
    }

    /// Number of permits available right now.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.load(Ordering::SeqCst)
    }

    /// Number of threads blocked waiting for a permit right now.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.waiters.load(Ordering::SeqCst)
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl TryFrom<i64> for Semaphore {
    type Error = Error;

    /// Creates a semaphore from a signed permit count, rejecting negative counts.
    fn try_from(permits: i64) -> Result<Self> {
        usize::try_from(permits)
            .ok()
            .map(Self::new)
            .ok_or(Error::InvalidArgument(
                "initial permit count must not be negative",
            ))
    }
}

impl fmt::Debug for Semaphore {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("permits", &self.available_permits())
            .field("waiters", &self.waiter_count())
            .finish_non_exhaustive()
    }
}
