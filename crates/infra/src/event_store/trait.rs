use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use stockguard_core::{AggregateId, ExpectedVersion};
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a sequence number).
///
/// Lifecycle:
///
/// 1. **Domain event**: produced by an aggregate mutator, held in its
///    uncommitted list
/// 2. **UncommittedEvent**: serialized and wrapped with stream metadata
/// 3. **StoredEvent**: persisted with an assigned `sequence_number`
///
/// Build one with `UncommittedEvent::from_typed()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream.
///
/// Sequence numbers are assigned by the store during append. They start at 1,
/// grow by exactly one per event within a stream, and never change. The last
/// sequence number of a stream is its revision, which is what optimistic
/// concurrency checks compare against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// Event store operation error.
///
/// Infrastructure failures only; domain refusals never reach the store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream moved on since the writer loaded it.
    #[error("optimistic concurrency check failed: expected revision {expected:?}, found {actual}")]
    Concurrency { expected: Option<u64>, actual: u64 },

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event serialization failed: {0}")]
    Serialization(String),

    /// Backend unreachable / overloaded / lock poisoned.
    #[error("event store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only event store.
///
/// One stream per aggregate instance, keyed by `aggregate_id`.
///
/// `append()`:
/// - rejects batches that mix aggregates or aggregate types
/// - checks `expected_version` against the current stream revision
/// - assigns sequence numbers starting at `current_revision + 1`
/// - persists the whole batch or nothing
///
/// `load_stream()` returns the stream in sequence order, or an empty vector
/// for an aggregate that has never been written.
pub trait EventStore: Send + Sync {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(aggregate_id)
    }
}

impl UncommittedEvent {
    /// Serialize a typed domain event, keeping the metadata needed to read it back.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: stockguard_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| EventStoreError::Serialization(e.to_string()))?;

        Ok(Self {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
