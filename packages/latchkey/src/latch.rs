//! One-shot latch with blocking and future-based waits.

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use delayer::{ThreadTimer, TimerService};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    CancellationToken, CompletionCell, Error, Outcome, Result, Timeout, WaitRegistry,
};

/// A gate that starts closed and, once opened, stays open forever.
///
/// Threads and tasks wait for the latch to open. Opening releases every pending wait in the
/// order the waits were registered, and every later wait completes immediately.
///
/// A wait can end in one of three ways: the latch opens, its timeout elapses or it is
/// cancelled. These can happen concurrently on different threads; exactly one of them
/// decides the outcome and the others have no effect. Timeouts are driven by a
/// [`TimerService`] that the latch owns or is given at construction.
///
/// Checking whether the latch is open, and waiting on an open latch, never takes a lock.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::thread;
///
/// use latchkey::{BooleanLatch, Timeout};
///
/// let latch = Arc::new(BooleanLatch::new());
///
/// let waiters = (0..4)
///     .map(|_| {
///         let latch = Arc::clone(&latch);
///         thread::spawn(move || latch.wait(Timeout::Infinite))
///     })
///     .collect::<Vec<_>>();
///
/// latch.open();
///
/// for waiter in waiters {
///     assert!(waiter.join().unwrap());
/// }
/// ```
///
/// Future-based waits are plain [`Future`]s and do not require any particular runtime:
///
/// ```rust
/// use std::time::Duration;
///
/// use futures::executor::block_on;
/// use latchkey::BooleanLatch;
///
/// let latch = BooleanLatch::new();
///
/// // Nobody opens the latch, so the wait times out.
/// assert_eq!(block_on(latch.wait_async(Duration::from_millis(10))), Ok(false));
/// ```
pub struct BooleanLatch {
    shared: Arc<LatchShared>,
}

struct LatchShared {
    open: AtomicBool,
    registry: Mutex<WaitRegistry<Arc<Waiter>>>,
    timer: Arc<dyn TimerService>,
}

/// One registered wait.
///
/// Shared between the [`LatchWait`] handles of the wait, the latch registry and the timer and
/// cancellation callbacks that race to resolve it.
struct Waiter {
    id: u64,

    // Weak so that pending timer callbacks do not keep an abandoned latch alive.
    latch: Weak<LatchShared>,

    cell: Arc<CompletionCell>,

    #[cfg(test)]
    resolutions: std::sync::atomic::AtomicUsize,
}

impl BooleanLatch {
    /// Creates a closed latch that drives timeouts on its own background timer thread.
    ///
    /// The thread is only started by the first wait that has a timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a latch with a custom initial state or timer.
    #[must_use]
    pub fn builder() -> BooleanLatchBuilder {
        BooleanLatchBuilder::new()
    }

    /// Whether the latch has been opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Opens the latch, releasing every pending wait in registration order.
    ///
    /// Opening an open latch does nothing.
    pub fn open(&self) {
        // SeqCst orders this against the double-check that waiters perform under the
        // registry lock: a waiter either sees the latch open or is in the list we drain.
        if self.shared.open.swap(true, Ordering::SeqCst) {
            return;
        }

        let waiters = self.shared.registry.lock().close();

        debug!(released = waiters.len(), "latch opened");

        for waiter in waiters {
            // A timer or cancel may have claimed the waiter just before we closed the
            // registry, in which case it is theirs to resolve.
            if waiter.cell.try_claim() {
                waiter.finish(Outcome::Satisfied);
            }
        }
    }

    /// Returns a future that completes when the latch opens or `timeout` elapses.
    ///
    /// The future resolves to `Ok(true)` if the latch opened and `Ok(false)` on timeout. A zero
    /// timeout on a closed latch returns an already completed future without registering.
    ///
    /// The wait is registered right away, not on first poll, so dropping the future does not
    /// withdraw it; use [`try_cancel()`][Self::try_cancel] for that.
    pub fn wait_async(&self, timeout: impl Into<Timeout>) -> LatchWait {
        self.wait_async_core(timeout.into(), None)
    }

    /// Like [`wait_async()`][Self::wait_async] but the wait is also cancelled when `cancel` is.
    ///
    /// A cancelled wait resolves to [`Error::Cancelled`]. If the token is already cancelled
    /// and the latch is closed, the returned future is already cancelled.
    pub fn wait_async_with_cancel(
        &self,
        timeout: impl Into<Timeout>,
        cancel: &CancellationToken,
    ) -> LatchWait {
        self.wait_async_core(timeout.into(), Some(cancel))
    }

    fn wait_async_core(&self, timeout: Timeout, cancel: Option<&CancellationToken>) -> LatchWait {
        if self.is_open() {
            return LatchWait::ready(Outcome::Satisfied);
        }

        let waiter = {
            let mut registry = self.shared.registry.lock();

            if self.is_open() {
                return LatchWait::ready(Outcome::Satisfied);
            }

            if timeout.is_zero() {
                return LatchWait::ready(Outcome::TimedOut);
            }

            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return LatchWait::ready(Outcome::Cancelled);
            }

            let latch = Arc::downgrade(&self.shared);

            // The latch may have been opened after our double-check, in which case the
            // registry is already closed and the wait is satisfied.
            let Some(waiter) = registry.insert(|id| Arc::new(Waiter::new(id, latch))) else {
                return LatchWait::ready(Outcome::Satisfied);
            };

            Arc::clone(waiter)
        };

        trace!(id = waiter.id, ?timeout, "latch wait registered");

        // Armed outside the registry lock, as the callbacks take it when they fire. Anything
        // armed after the waiter was already resolved is released by the attach call.
        if let Some(delay) = timeout.duration() {
            let timed_out = Arc::clone(&waiter);
            let handle = self.shared.timer.schedule(
                delay,
                Box::new(move || {
                    timed_out.complete(Outcome::TimedOut);
                }),
            );

            waiter.cell.attach_timer(handle);
        }

        if let Some(cancel) = cancel {
            let cancelled = Arc::clone(&waiter);
            let registration = cancel.register(move || {
                cancelled.complete(Outcome::Cancelled);
            });

            waiter.cell.attach_cancellation(registration);
        }

        LatchWait {
            inner: WaitInner::Pending(waiter),
        }
    }

    /// Blocks the calling thread until the latch opens or `timeout` elapses.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub fn wait(&self, timeout: impl Into<Timeout>) -> bool {
        // Only a cancel can make the wait fail and nobody else has access to this one.
        self.wait_async(timeout).wait().unwrap_or(false)
    }

    /// Blocks the calling thread until the latch opens, `timeout` elapses or `interrupt` is
    /// cancelled.
    ///
    /// When the interrupt arrives while the wait is still outstanding, the wait is withdrawn
    /// and [`Error::Interrupted`] is returned. When the wait had already been decided at that
    /// point, its result is returned instead. The token stays cancelled either way, so the
    /// caller can still observe the interruption.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] if `interrupt` was cancelled while the wait was still
    /// outstanding.
    pub fn wait_interruptible(
        &self,
        timeout: impl Into<Timeout>,
        interrupt: &CancellationToken,
    ) -> Result<bool> {
        let wait = self.wait_async(timeout);

        match wait.wait_interruptible(interrupt) {
            Err(Error::Interrupted) => {
                if self.try_cancel(&wait)? {
                    trace!("latch wait interrupted");
                    return Err(Error::Interrupted);
                }

                // Lost the race: the outcome is already decided and only needs collecting.
                wait.wait()
            }
            result => result,
        }
    }

    /// Withdraws a wait issued by this latch.
    ///
    /// Returns `Ok(true)` if the wait was still outstanding and is now resolved as cancelled,
    /// `Ok(false)` if it had already completed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the wait was issued by a different latch.
    pub fn try_cancel(&self, wait: &LatchWait) -> Result<bool> {
        let WaitInner::Pending(waiter) = &wait.inner else {
            return Ok(false);
        };

        if !ptr::eq(waiter.latch.as_ptr(), Arc::as_ptr(&self.shared)) {
            return Err(Error::InvalidArgument(
                "the wait was issued by a different latch",
            ));
        }

        Ok(waiter.complete(Outcome::Cancelled))
    }

    /// Number of waits currently registered and not yet resolved.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.shared.registry.lock().len()
    }
}

impl Default for BooleanLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BooleanLatch {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("open", &self.is_open())
            .field("waiters", &self.waiter_count())
            .field("timer", &self.shared.timer)
            .finish()
    }
}

impl Drop for LatchShared {
    fn drop(&mut self) {
        // Nobody can open the latch anymore, so whatever is still waiting is cancelled.
        let waiters = self.registry.get_mut().close();

        if !waiters.is_empty() {
            debug!(
                cancelled = waiters.len(),
                "latch dropped with pending waits"
            );
        }

        for waiter in waiters {
            if waiter.cell.try_claim() {
                waiter.finish(Outcome::Cancelled);
            }
        }
    }
}

impl Waiter {
    fn new(id: u64, latch: Weak<LatchShared>) -> Self {
        Self {
            id,
            latch,
            cell: Arc::new(CompletionCell::new()),
            #[cfg(test)]
            resolutions: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Resolves the wait with `outcome` unless some other path already claimed it.
    ///
    /// Used by every path except opening, which takes the waiters out of the registry itself.
    fn complete(&self, outcome: Outcome) -> bool {
        if !self.cell.try_claim() {
            return false;
        }

        if let Some(latch) = self.latch.upgrade() {
            let removed = latch.registry.lock().remove(self.id);
            drop(removed);
        }

        self.finish(outcome);
        true
    }

    /// Must only be called after winning the claim.
    fn finish(&self, outcome: Outcome) {
        #[cfg(test)]
        self.resolutions.fetch_add(1, Ordering::Relaxed);

        self.cell.release_resources();
        self.cell.resolve(outcome);

        trace!(id = self.id, ?outcome, "latch wait resolved");
    }
}

/// Builder for [`BooleanLatch`].
#[derive(Debug, Default)]
#[must_use]
pub struct BooleanLatchBuilder {
    initially_open: bool,
    timer: Option<Arc<dyn TimerService>>,
}

impl BooleanLatchBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Whether the latch starts out open. Defaults to closed.
    pub fn initially_open(mut self, initially_open: bool) -> Self {
        self.initially_open = initially_open;
        self
    }

    /// The timer that drives wait timeouts.
    ///
    /// Defaults to a [`ThreadTimer`] owned by the latch. Pass an `Arc` to share one timer
    /// between several latches.
    pub fn timer(mut self, timer: impl TimerService + 'static) -> Self {
        self.timer = Some(Arc::new(timer));
        self
    }

    /// Creates the latch.
    #[must_use]
    pub fn build(self) -> BooleanLatch {
        let timer: Arc<dyn TimerService> = match self.timer {
            Some(timer) => timer,
            None => Arc::new(ThreadTimer::new()),
        };

        let registry = if self.initially_open {
            WaitRegistry::new_closed()
        } else {
            WaitRegistry::new()
        };

        BooleanLatch {
            shared: Arc::new(LatchShared {
                open: AtomicBool::new(self.initially_open),
                registry: Mutex::new(registry),
                timer,
            }),
        }
    }
}

/// A wait on a [`BooleanLatch`], usable both as a [`Future`] and as a blocking handle.
///
/// Resolves to `Ok(true)` if the latch opened, `Ok(false)` if the wait timed out and
/// [`Error::Cancelled`] if it was cancelled. Clones refer to the same wait and observe the
/// same outcome.
///
/// Dropping every clone does not withdraw a pending wait. It stays registered with the latch
/// until it times out, is cancelled, the latch opens or the latch is dropped. Waits with an
/// infinite timeout on a latch that never opens therefore accumulate; withdraw them with
/// [`BooleanLatch::try_cancel()`] or give them a cancellation token.
#[derive(Clone)]
#[must_use = "the wait stays registered whether or not the result is looked at"]
pub struct LatchWait {
    inner: WaitInner,
}

#[derive(Clone)]
enum WaitInner {
    // Decided before anything was registered.
    Ready(Outcome),
    Pending(Arc<Waiter>),
}

impl LatchWait {
    fn ready(outcome: Outcome) -> Self {
        Self {
            inner: WaitInner::Ready(outcome),
        }
    }

    /// The outcome so far, without blocking.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        match &self.inner {
            WaitInner::Ready(outcome) => *outcome,
            WaitInner::Pending(waiter) => waiter.cell.outcome(),
        }
    }

    /// Whether the wait has been decided.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        !self.outcome().is_pending()
    }

    /// Blocks the calling thread until the wait is decided.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the wait was cancelled.
    pub fn wait(&self) -> Result<bool> {
        match &self.inner {
            WaitInner::Ready(outcome) => settled(*outcome),
            WaitInner::Pending(waiter) => settled(waiter.cell.wait()),
        }
    }

    /// Blocks the calling thread until the wait is decided or `interrupt` is cancelled.
    ///
    /// Being interrupted does not withdraw the wait.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the wait was cancelled and [`Error::Interrupted`] if
    /// `interrupt` was cancelled while the wait was still outstanding.
    pub fn wait_interruptible(&self, interrupt: &CancellationToken) -> Result<bool> {
        match &self.inner {
            WaitInner::Ready(outcome) => settled(*outcome),
            WaitInner::Pending(waiter) => settled(waiter.cell.wait_interruptible(interrupt)?),
        }
    }
}

fn settled(outcome: Outcome) -> Result<bool> {
    debug_assert!(!outcome.is_pending(), "a settled wait cannot be pending");

    outcome.into_result().unwrap_or(Err(Error::Cancelled))
}

impl Future for LatchWait {
    type Output = Result<bool>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match &self.inner {
            WaitInner::Ready(outcome) => *outcome,
            WaitInner::Pending(waiter) => waiter.cell.poll_outcome(cx.waker()),
        };

        if outcome.is_pending() {
            Poll::Pending
        } else {
            Poll::Ready(settled(outcome))
        }
    }
}

impl fmt::Debug for LatchWait {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("outcome", &self.outcome())
            .finish_non_exhaustive()
    }
}
