//! Fault-injecting store wrapper for resilience tests and benches.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use stockguard_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Wraps a real store and fails selected calls on demand.
///
/// Counters are consumed one per call, so `fail_next_loads(2)` fails exactly
/// the next two loads and then lets traffic through again.
#[derive(Debug, Default)]
pub struct FaultInjectingEventStore<S> {
    inner: S,
    unavailable: AtomicBool,
    failing_loads: AtomicU32,
    failing_appends: AtomicU32,
    conflicting_appends: AtomicU32,
    loads: AtomicU64,
    appends: AtomicU64,
}

impl<S> FaultInjectingEventStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            unavailable: AtomicBool::new(false),
            failing_loads: AtomicU32::new(0),
            failing_appends: AtomicU32::new(0),
            conflicting_appends: AtomicU32::new(0),
            loads: AtomicU64::new(0),
            appends: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail every call until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_next_loads(&self, n: u32) {
        self.failing_loads.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_appends(&self, n: u32) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    /// Reject the next `n` appends as if another writer got there first.
    pub fn conflict_next_appends(&self, n: u32) {
        self.conflicting_appends.store(n, Ordering::SeqCst);
    }

    /// Number of `load_stream` calls that reached this wrapper.
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of `append` calls that reached this wrapper.
    pub fn appends(&self) -> u64 {
        self.appends.load(Ordering::SeqCst)
    }

    fn consume(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<S: EventStore> EventStore for FaultInjectingEventStore<S> {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.appends.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) || Self::consume(&self.failing_appends) {
            return Err(EventStoreError::Unavailable("injected append failure".to_string()));
        }
        if Self::consume(&self.conflicting_appends) {
            let expected = expected_version.revision();
            return Err(EventStoreError::Concurrency {
                expected,
                actual: expected.map_or(1, |v| v + 1),
            });
        }

        self.inner.append(events, expected_version)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) || Self::consume(&self.failing_loads) {
            return Err(EventStoreError::Unavailable("injected load failure".to_string()));
        }

        self.inner.load_stream(aggregate_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;

    #[test]
    fn injected_failures_are_consumed_one_per_call() {
        let store = FaultInjectingEventStore::new(InMemoryEventStore::new());
        store.fail_next_loads(2);
        let id = AggregateId::new();

        assert!(store.load_stream(id).is_err());
        assert!(store.load_stream(id).is_err());
        assert!(store.load_stream(id).is_ok());
        assert_eq!(store.loads(), 3);
    }

    #[test]
    fn unavailable_store_rejects_everything() {
        let store = FaultInjectingEventStore::new(InMemoryEventStore::new());
        store.set_unavailable(true);

        assert!(matches!(
            store.load_stream(AggregateId::new()),
            Err(EventStoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.append(vec![], ExpectedVersion::Any),
            Err(EventStoreError::Unavailable(_))
        ));
    }
}
