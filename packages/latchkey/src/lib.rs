#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Synchronization primitives with lock-free fast paths, timeouts and cancellation.
//!
//! This crate provides three primitives:
//!
//! - [`BooleanLatch`] - a one-shot gate. Waits can block the calling thread or be awaited as a
//!   [`Future`][std::future::Future], with an optional timeout and an optional
//!   [`CancellationToken`].
//! - [`Semaphore`] - a counting semaphore with blocking acquire.
//! - [`ManualResetEvent`] - an event that stays signaled until reset, with blocking wait.
//!
//! When the primitive is already in the desired state, waiting never takes a lock. Otherwise
//! the waiter registers and blocks (or returns a pending future) until released.
//!
//! A pending latch wait can be released by several parties at once: the latch opening, its
//! timeout firing on a [`delayer::TimerService`] and an explicit cancellation. Every wait is
//! resolved by exactly one of them; the others observe that they lost and back off.
//!
//! Blocking waits come in two flavors: a plain one that only ends on success or timeout, and an
//! `_interruptible` one that also ends with [`Error::Interrupted`] when a
//! [`CancellationToken`] is cancelled while the wait is still outstanding.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//! use std::time::Duration;
//!
//! use latchkey::{BooleanLatch, Timeout};
//!
//! let latch = Arc::new(BooleanLatch::new());
//!
//! let worker = {
//!     let latch = Arc::clone(&latch);
//!     thread::spawn(move || latch.wait(Timeout::Infinite))
//! };
//!
//! latch.open();
//! assert!(worker.join().unwrap());
//!
//! // Once open, a latch never blocks again.
//! assert!(latch.wait(Duration::ZERO));
//! ```
//!
//! # Deterministic timeouts
//!
//! The latch takes its timer as a dependency. Injecting a [`delayer::ManualTimer`] makes
//! timeouts fire exactly when the test says so:
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use delayer::ManualTimer;
//! use latchkey::{BooleanLatch, Outcome};
//!
//! let timer = Arc::new(ManualTimer::new());
//! let latch = BooleanLatch::builder().timer(Arc::clone(&timer)).build();
//!
//! let wait = latch.wait_async(Duration::from_millis(100));
//!
//! timer.advance(Duration::from_millis(100));
//! assert_eq!(wait.outcome(), Outcome::TimedOut);
//! ```

mod cancel;
mod cell;
mod error;
mod event;
mod latch;
mod monitor;
mod registry;
mod semaphore;
mod timeout;

pub use cancel::{CancellationRegistration, CancellationToken};
pub(crate) use cell::CompletionCell;
pub use cell::Outcome;
pub use error::{Error, Result};
pub use event::ManualResetEvent;
pub use latch::{BooleanLatch, BooleanLatchBuilder, LatchWait};
pub(crate) use monitor::Monitor;
pub(crate) use registry::WaitRegistry;
pub use semaphore::Semaphore;
pub use timeout::Timeout;
