use std::collections::BTreeMap;
use std::mem;

/// Pending waiters of one primitive, in registration order.
///
/// Each entry is keyed by an id handed out at registration, so a waiter that is resolved by
/// some other path (timeout, cancellation) can take itself out again. Closing the registry
/// hands over every entry at once and refuses all later registrations.
///
/// The registry is not synchronized; the owner keeps it behind its lock.
#[derive(Debug)]
pub(crate) struct WaitRegistry<T> {
    entries: BTreeMap<u64, T>,
    next_id: u64,
    closed: bool,
}

impl<T> WaitRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 0,
            closed: false,
        }
    }

    /// A registry that never accepted any registration.
    pub(crate) fn new_closed() -> Self {
        Self {
            closed: true,
            ..Self::new()
        }
    }

    /// Registers the entry built by `make` from its freshly assigned id.
    ///
    /// Returns `None` without calling `make` if the registry has been closed.
    pub(crate) fn insert(&mut self, make: impl FnOnce(u64) -> T) -> Option<&T> {
        if self.closed {
            return None;
        }

        let id = self.next_id;
        // 64 bits do not wrap around in practice.
        self.next_id = self.next_id.wrapping_add(1);

        Some(self.entries.entry(id).or_insert(make(id)))
    }

    pub(crate) fn remove(&mut self, id: u64) -> Option<T> {
        self.entries.remove(&id)
    }

    /// Takes every entry in registration order and refuses further registrations.
    ///
    /// Closing an already closed registry returns nothing.
    pub(crate) fn close(&mut self) -> Vec<T> {
        self.closed = true;
        mem::take(&mut self.entries).into_values().collect()
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn close_returns_entries_in_registration_order() {
        let mut registry = WaitRegistry::new();

        for name in ["first", "second", "third"] {
            registry.insert(|_| name).unwrap();
        }

        assert_eq!(registry.close(), vec!["first", "second", "third"]);
        assert!(registry.is_empty());
        assert!(registry.is_closed());
    }

    #[test]
    fn insert_hands_out_distinct_ids() {
        let mut registry = WaitRegistry::new();

        let first = *registry.insert(|id| id).unwrap();
        let second = *registry.insert(|id| id).unwrap();

        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn removed_entry_is_not_released_on_close() {
        let mut registry = WaitRegistry::new();

        let keep = *registry.insert(|id| id).unwrap();
        let gone = *registry.insert(|id| id).unwrap();

        assert_eq!(registry.remove(gone), Some(gone));
        assert_eq!(registry.remove(gone), None);

        assert_eq!(registry.close(), vec![keep]);
    }

    #[test]
    fn closed_registry_refuses_insert() {
        let mut registry = WaitRegistry::new();
        registry.close();

        let mut called = false;
        assert!(
            registry
                .insert(|_| {
                    called = true;
                })
                .is_none()
        );
        assert!(!called);
        assert!(registry.close().is_empty());
    }

    #[test]
    fn id_counter_wraps_instead_of_panicking() {
        let mut registry = WaitRegistry::new();
        registry.next_id = u64::MAX;

        assert_eq!(*registry.insert(|id| id).unwrap(), u64::MAX);
        assert_eq!(*registry.insert(|id| id).unwrap(), 0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn new_closed_is_closed_and_empty() {
        let registry = WaitRegistry::<u32>::new_closed();

        assert!(registry.is_closed());
        assert_eq!(registry.len(), 0);
    }
}
