use std::collections::HashMap;
use std::sync::RwLock;

use stockguard_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// In-memory append-only event store.
///
/// The write lock is held across the version check and the append, which is
/// what makes the optimistic check atomic.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some(first) = events.first() else {
            return Ok(vec![]);
        };

        let aggregate_id = first.aggregate_id;
        let aggregate_type = first.aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        let stream = streams.entry(aggregate_id).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency {
                expected: expected_version.revision(),
                actual: current,
            });
        }

        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        let mut committed = Vec::with_capacity(events.len());
        for (offset, e) in events.into_iter().enumerate() {
            committed.push(StoredEvent {
                event_id: e.event_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: current + 1 + offset as u64,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            });
        }
        stream.extend(committed.iter().cloned());

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "inventory.stock.replenished".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn append_assigns_consecutive_sequence_numbers() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let first = store
            .append(vec![event(id, "inventory"), event(id, "inventory")], ExpectedVersion::Exact(0))
            .unwrap();
        let second = store
            .append(vec![event(id, "inventory")], ExpectedVersion::Exact(2))
            .unwrap();

        let seqs: Vec<_> = first.iter().chain(&second).map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(store.load_stream(id).unwrap().len(), 3);
    }

    #[test]
    fn stale_expected_version_is_rejected_without_writing() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, "inventory")], ExpectedVersion::Exact(0))
            .unwrap();

        let err = store
            .append(vec![event(id, "inventory")], ExpectedVersion::Exact(0))
            .unwrap_err();

        assert!(matches!(
            err,
            EventStoreError::Concurrency {
                expected: Some(0),
                actual: 1
            }
        ));
        assert_eq!(store.load_stream(id).unwrap().len(), 1);
    }

    #[test]
    fn mixed_batches_are_rejected() {
        let store = InMemoryEventStore::new();
        let err = store
            .append(
                vec![event(AggregateId::new(), "inventory"), event(AggregateId::new(), "inventory")],
                ExpectedVersion::Any,
            )
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    #[test]
    fn aggregate_type_is_stable_per_stream() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, "inventory")], ExpectedVersion::Any)
            .unwrap();

        let err = store
            .append(vec![event(id, "warehouse")], ExpectedVersion::Any)
            .unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }

    #[test]
    fn unknown_stream_loads_empty() {
        let store = InMemoryEventStore::new();
        assert!(store.load_stream(AggregateId::new()).unwrap().is_empty());
    }
}
