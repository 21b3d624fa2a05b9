//! Single-assignment outcome slot with an exactly-once claim.

use std::any::type_name;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::Waker;

use delayer::TimerHandle;
use parking_lot::{Condvar, Mutex};

use crate::{CancellationRegistration, CancellationToken, Error, Result};

/// How a wait ended, or that it has not ended yet.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_enums,
    reason = "a wait can only be satisfied, time out or be cancelled"
)]
pub enum Outcome {
    /// The wait is still outstanding.
    Pending,

    /// The awaited condition became true.
    Satisfied,

    /// The wait gave up because its timeout elapsed.
    TimedOut,

    /// The wait was withdrawn before the condition became true.
    Cancelled,
}

impl Outcome {
    /// Whether the wait is still outstanding.
    #[must_use]
    pub fn is_pending(self) -> bool {
        self == Self::Pending
    }

    /// The result a finished wait reports, or `None` if it has not finished.
    ///
    /// Satisfied maps to `Ok(true)`, timed out to `Ok(false)` and cancelled to
    /// [`Error::Cancelled`].
    #[must_use]
    pub fn into_result(self) -> Option<Result<bool>> {
        match self {
            Self::Pending => None,
            Self::Satisfied => Some(Ok(true)),
            Self::TimedOut => Some(Ok(false)),
            Self::Cancelled => Some(Err(Error::Cancelled)),
        }
    }
}

struct CellState {
    outcome: Outcome,
    wakers: Vec<Waker>,
}

#[derive(Default)]
struct CellResources {
    timer: Option<TimerHandle>,
    cancellation: Option<CancellationRegistration>,
    released: bool,
}

/// Resolution slot of one waiter.
///
/// Any number of parties may race to resolve the cell: the condition becoming true, a timer
/// firing, an explicit cancel. Each of them must first win [`try_claim()`][Self::try_claim],
/// which succeeds for exactly one caller over the lifetime of the cell. Only the winner may
/// call [`release_resources()`][Self::release_resources] and [`resolve()`][Self::resolve].
/// Losers must not touch the cell any further.
///
/// The claim itself is a single compare-and-swap; the locks inside only protect the outcome
/// handoff to whoever is waiting and the resources attached to the cell.
pub(crate) struct CompletionCell {
    claimed: AtomicBool,

    state: Mutex<CellState>,
    resolved: Condvar,

    resources: Mutex<CellResources>,
}

impl CompletionCell {
    pub(crate) fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
            state: Mutex::new(CellState {
                outcome: Outcome::Pending,
                wakers: Vec::new(),
            }),
            resolved: Condvar::new(),
            resources: Mutex::new(CellResources::default()),
        }
    }

    /// Returns `true` to exactly one caller, who then owns the resolution of the cell.
    pub(crate) fn try_claim(&self) -> bool {
        // Cheap early out for the common case of losing to a resolver that is long done.
        if self.claimed.load(Ordering::Acquire) {
            return false;
        }

        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Publishes the outcome and wakes everyone waiting for it.
    ///
    /// Must only be called once, by the winner of the claim.
    pub(crate) fn resolve(&self, outcome: Outcome) {
        debug_assert!(self.is_claimed(), "resolve() without winning the claim");
        debug_assert!(!outcome.is_pending(), "a cell cannot be resolved as pending");

        let wakers = {
            let mut state = self.state.lock();

            debug_assert!(state.outcome.is_pending(), "cell resolved twice");

            state.outcome = outcome;
            self.resolved.notify_all();

            mem::take(&mut state.wakers)
        };

        // Woken outside the lock, as a waker may poll the future inline.
        for waker in wakers {
            waker.wake();
        }
    }

    pub(crate) fn outcome(&self) -> Outcome {
        self.state.lock().outcome
    }

    /// Returns the outcome, remembering `waker` to be woken on resolution if it is pending.
    pub(crate) fn poll_outcome(&self, waker: &Waker) -> Outcome {
        let mut state = self.state.lock();

        if state.outcome.is_pending() && !state.wakers.iter().any(|w| w.will_wake(waker)) {
            state.wakers.push(waker.clone());
        }

        state.outcome
    }

    /// Blocks the calling thread until the cell is resolved.
    pub(crate) fn wait(&self) -> Outcome {
        let mut state = self.state.lock();

        while state.outcome.is_pending() {
            self.resolved.wait(&mut state);
        }

        state.outcome
    }

    /// Blocks the calling thread until the cell is resolved or `interrupt` is cancelled.
    ///
    /// An outcome that is already available is returned even if the token is cancelled.
    pub(crate) fn wait_interruptible(
        self: &Arc<Self>,
        interrupt: &CancellationToken,
    ) -> Result<Outcome> {
        // Registered before taking the lock, as an already cancelled token runs the
        // callback right here and the callback takes the lock.
        let _registration = {
            let cell = Arc::clone(self);
            interrupt.register(move || {
                let _state = cell.state.lock();
                cell.resolved.notify_all();
            })
        };

        let mut state = self.state.lock();

        loop {
            if !state.outcome.is_pending() {
                return Ok(state.outcome);
            }

            if interrupt.is_cancelled() {
                return Err(Error::Interrupted);
            }

            self.resolved.wait(&mut state);
        }
    }

    /// Hands the timer that will resolve this cell over to the cell.
    ///
    /// If the resources were already released, the timer is cancelled right away.
    pub(crate) fn attach_timer(&self, timer: TimerHandle) {
        let mut resources = self.resources.lock();

        if resources.released {
            drop(resources);
            timer.cancel();
            return;
        }

        resources.timer = Some(timer);
    }

    /// Hands the cancellation callback registration of this cell over to the cell.
    ///
    /// If the resources were already released, the registration is dropped right away.
    pub(crate) fn attach_cancellation(&self, registration: CancellationRegistration) {
        let mut resources = self.resources.lock();

        if resources.released {
            drop(resources);
            drop(registration);
            return;
        }

        resources.cancellation = Some(registration);
    }

    /// Cancels the timer and unregisters the cancellation callback of this cell.
    ///
    /// Only the first call has any effect; anything attached later is released on attach.
    pub(crate) fn release_resources(&self) {
        let (timer, cancellation) = {
            let mut resources = self.resources.lock();

            if resources.released {
                return;
            }

            resources.released = true;
            (resources.timer.take(), resources.cancellation.take())
        };

        // A timer that already started firing cannot be stopped; the claim decides
        // what happens then, so the result of the cancel does not matter.
        if let Some(timer) = timer {
            timer.cancel();
        }

        drop(cancellation);
    }
}

impl fmt::Debug for CompletionCell {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("claimed", &self.is_claimed())
            .field("outcome", &self.outcome())
            .finish_non_exhaustive()
    }
}
