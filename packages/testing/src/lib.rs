#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing and examples in Latchkey packages.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// How often [`wait_until()`] re-evaluates its condition.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Runs a test with a timeout to prevent infinite hangs.
///
/// A blocking primitive with a lost wakeup does not fail, it just never returns. This wraps
/// the test closure so that such a bug turns into a test failure instead of a stuck build.
///
/// The timeout is 10 seconds under normal conditions and 60 seconds under
/// Miri, where thread synchronization primitives are significantly slower.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog
/// is disabled and the test function is executed directly. This allows mutation
/// testing to properly detect hanging mutations.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode).
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let answer = with_watchdog(|| 6 * 7);
/// assert_eq!(answer, 42);
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the watchdog has already given up on us.
        drop(tx.send(result));
    });

    let timeout = if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    };

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("Test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("Test exceeded {timeout:?} timeout - likely stuck in a blocking wait");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            // Thread panicked, join it to get the panic.
            match test_handle.join() {
                Ok(()) => panic!("Test thread disconnected unexpectedly"),
                Err(e) => std::panic::resume_unwind(e),
            }
        }
    }
}

/// Polls `condition` until it returns `true` or `timeout` elapses.
///
/// Returns whether the condition was observed to be `true`. Used to wait for other threads
/// to reach a blocking call (e.g. until a primitive reports the expected number of waiters)
/// without guessing a sleep duration.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use testing::wait_until;
///
/// assert!(wait_until(Duration::from_millis(10), || true));
/// assert!(!wait_until(Duration::from_millis(10), || false));
/// ```
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;

    loop {
        if condition() {
            return true;
        }

        if Instant::now() >= deadline {
            return false;
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Asserts that `elapsed` is at least `expected` and at most `expected + slack`.
///
/// Timing assertions on real clocks need slack for scheduling delays. The lower bound has
/// none, because a timeout that fires early is always a bug.
///
/// # Panics
///
/// Panics if `elapsed` is outside the accepted range.
#[track_caller]
pub fn assert_elapsed_near(elapsed: Duration, expected: Duration, slack: Duration) {
    assert!(
        elapsed >= expected,
        "elapsed {elapsed:?} is shorter than the expected {expected:?}"
    );
    assert!(
        elapsed <= expected.saturating_add(slack),
        "elapsed {elapsed:?} exceeds the expected {expected:?} by more than {slack:?}"
    );
}
