#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! One-shot delayed callbacks with best-effort cancellation.
//!
//! A [`TimerService`] schedules a callback to run once after a delay and hands back a
//! [`TimerHandle`] that can deactivate the callback if it has not started running yet.
//! Cancellation is best-effort: a callback that is already executing cannot be stopped,
//! so callers that race a timer against other events must resolve that race themselves.
//!
//! Two implementations are provided:
//!
//! - [`ThreadTimer`] runs callbacks on a dedicated background thread, driven by the real clock.
//!   The thread is only started when the first callback is scheduled.
//! - [`ManualTimer`] runs callbacks on whichever thread calls [`ManualTimer::advance()`],
//!   driven by a virtual clock. This makes timing-dependent logic deterministic in tests.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::time::Duration;
//!
//! use delayer::{ManualTimer, TimerService};
//!
//! let timer = ManualTimer::new();
//! let fired = Arc::new(AtomicBool::new(false));
//!
//! let fired_clone = Arc::clone(&fired);
//! let _handle = timer.schedule(
//!     Duration::from_millis(100),
//!     Box::new(move || fired_clone.store(true, Ordering::Relaxed)),
//! );
//!
//! timer.advance(Duration::from_millis(99));
//! assert!(!fired.load(Ordering::Relaxed));
//!
//! timer.advance(Duration::from_millis(1));
//! assert!(fired.load(Ordering::Relaxed));
//! ```

mod handle;
mod manual_timer;
mod queue;
mod service;
mod thread_timer;

pub use handle::*;
pub use manual_timer::*;
pub(crate) use queue::*;
pub use service::*;
pub use thread_timer::*;
