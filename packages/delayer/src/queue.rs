//! Deadline-ordered storage for scheduled callbacks, shared by all timer implementations.
//!
//! Deadlines are expressed as an offset from the origin of the clock that drives the queue
//! (real or virtual), which lets both timer flavors share the same ordering logic.

use std::any::type_name;
use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::TimerCallback;

/// Identifies one scheduled callback. Ordering is by deadline, then by scheduling order,
/// so callbacks with equal deadlines fire in FIFO order.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct TimerKey {
    deadline: Duration,
    sequence: u64,
}

impl TimerKey {
    pub(crate) fn deadline(self) -> Duration {
        self.deadline
    }
}

struct QueueState {
    entries: BTreeMap<TimerKey, TimerCallback>,
    next_sequence: u64,
    shutdown: bool,
}

pub(crate) struct TimerQueue {
    state: Mutex<QueueState>,

    // Signaled when the earliest deadline moves forward in time or on shutdown.
    // Only relevant for queues driven by a background thread.
    changed: Condvar,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: BTreeMap::new(),
                next_sequence: 0,
                shutdown: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn insert(&self, deadline: Duration, callback: TimerCallback) -> TimerKey {
        let mut state = self.state.lock();

        let key = TimerKey {
            deadline,
            sequence: state.next_sequence,
        };
        state.next_sequence = state.next_sequence.wrapping_add(1);

        let becomes_earliest = state
            .entries
            .first_key_value()
            .is_none_or(|(earliest, _)| key < *earliest);

        state.entries.insert(key, callback);

        if becomes_earliest {
            // The driver thread may be sleeping until a later deadline.
            self.changed.notify_one();
        }

        key
    }

    /// Removes the callback if it has not been taken for execution yet.
    ///
    /// Returns `true` if this call removed it.
    pub(crate) fn remove(&self, key: TimerKey) -> bool {
        let removed = self.state.lock().entries.remove(&key);

        // The callback is dropped outside the lock, in case it owns something with a
        // nontrivial destructor that wants to schedule more work.
        removed.is_some()
    }

    pub(crate) fn contains(&self, key: TimerKey) -> bool {
        self.state.lock().entries.contains_key(&key)
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Takes the earliest callback if its deadline is not after `now`.
    pub(crate) fn pop_due(&self, now: Duration) -> Option<TimerCallback> {
        let mut state = self.state.lock();

        let (earliest, _) = state.entries.first_key_value()?;

        if earliest.deadline > now {
            return None;
        }

        state.entries.pop_first().map(|(_, callback)| callback)
    }

    /// Blocks until the earliest callback is due and takes it.
    ///
    /// Returns `None` once the queue has been shut down. `now` reports the current clock offset.
    pub(crate) fn pop_due_blocking(&self, now: impl Fn() -> Duration) -> Option<TimerCallback> {
        let mut state = self.state.lock();

        loop {
            if state.shutdown {
                return None;
            }

            let current = now();

            let earliest = state.entries.first_key_value().map(|(key, _)| *key);

            match earliest {
                Some(key) if key.deadline <= current => {
                    return state.entries.pop_first().map(|(_, callback)| callback);
                }
                Some(key) => {
                    let remaining = key.deadline.saturating_sub(current);
                    self.changed.wait_for(&mut state, remaining);
                }
                None => {
                    self.changed.wait(&mut state);
                }
            }
        }
    }

    /// Wakes up the driver and makes it exit. Callbacks that have not fired are dropped.
    pub(crate) fn shutdown(&self) {
        let abandoned = {
            let mut state = self.state.lock();
            state.shutdown = true;
            self.changed.notify_all();

            mem::take(&mut state.entries)
        };

        drop(abandoned);
    }
}

impl fmt::Debug for TimerQueue {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct(type_name::<Self>())
            .field("pending", &state.entries.len())
            .field("shutdown", &state.shutdown)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_callback(counter: &Arc<AtomicUsize>) -> TimerCallback {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
    }

    #[test]
    fn pop_due_respects_deadline() {
        let queue = TimerQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));

        queue.insert(Duration::from_millis(10), counting_callback(&counter));

        assert!(queue.pop_due(Duration::from_millis(9)).is_none());

        let callback = queue.pop_due(Duration::from_millis(10)).unwrap();
        callback();

        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn equal_deadlines_pop_in_insertion_order() {
        let queue = TimerQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for index in 0..3 {
            let order = Arc::clone(&order);
            queue.insert(
                Duration::from_millis(5),
                Box::new(move || order.lock().push(index)),
            );
        }

        while let Some(callback) = queue.pop_due(Duration::from_millis(5)) {
            callback();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn remove_only_succeeds_once() {
        let queue = TimerQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let key = queue.insert(Duration::from_millis(1), counting_callback(&counter));

        assert!(queue.contains(key));
        assert!(queue.remove(key));
        assert!(!queue.remove(key));
        assert!(!queue.contains(key));
        assert!(queue.pop_due(Duration::MAX).is_none());
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn shutdown_unblocks_driver() {
        let queue = TimerQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));

        queue.insert(Duration::from_secs(3600), counting_callback(&counter));
        queue.shutdown();

        assert!(queue.pop_due_blocking(|| Duration::ZERO).is_none());
        assert_eq!(queue.len(), 0);
    }
}
