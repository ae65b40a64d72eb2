//! Persistence boundary for inventory aggregates.
//!
//! ```text
//! load_or_create(id)
//!   ↓ load stream → validate ordering → rehydrate → check invariant
//! (service mutates the aggregate in memory)
//!   ↓
//! apply_events(&mut aggregate)
//!   ↓ serialize uncommitted events → append with ExpectedVersion::Exact(persisted)
//!   ↓ on success drain the uncommitted list
//! ```
//!
//! Counters and version are derived from the stream, so appending the events
//! *is* the atomic write of the new state. A concurrent writer that advanced
//! the stream in between surfaces as `RepositoryError::VersionConflict`.

use tracing::debug;

use stockguard_core::{Aggregate, AggregateRoot, DomainError, ExpectedVersion};
use stockguard_inventory::{InventoryAggregate, InventoryEvent, InventoryId};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

pub const INVENTORY_AGGREGATE_TYPE: &str = "inventory.stock";

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Optimistic concurrency failure: the stream moved since the aggregate was loaded.
    #[error("version conflict: expected {expected}, stream at {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error(transparent)]
    Store(EventStoreError),

    /// A stored payload could not be read back as an inventory event.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    /// The stream is out of order or rebuilds into an invalid state.
    #[error("corrupt stream: {0}")]
    Corrupt(#[from] DomainError),
}

impl RepositoryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RepositoryError::VersionConflict { .. })
    }
}

impl From<EventStoreError> for RepositoryError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency { expected, actual } => RepositoryError::VersionConflict {
                expected: expected.unwrap_or(actual),
                actual,
            },
            other => RepositoryError::Store(other),
        }
    }
}

pub trait InventoryRepository: Send + Sync {
    /// Load the current state, or a fresh empty aggregate for an unknown id.
    fn load_or_create(&self, id: InventoryId) -> Result<InventoryAggregate, RepositoryError>;

    /// Durably persist the aggregate's uncommitted events together with its
    /// new version, then clear them from the aggregate.
    ///
    /// On error the aggregate is left untouched.
    fn apply_events(
        &self,
        aggregate: &mut InventoryAggregate,
    ) -> Result<Vec<StoredEvent>, RepositoryError>;
}

/// Repository over any append-only `EventStore`.
#[derive(Debug)]
pub struct EventSourcedInventoryRepository<S> {
    store: S,
}

impl<S> EventSourcedInventoryRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: EventStore> InventoryRepository for EventSourcedInventoryRepository<S> {
    fn load_or_create(&self, id: InventoryId) -> Result<InventoryAggregate, RepositoryError> {
        let history = self.store.load_stream(id.0)?;
        validate_loaded_stream(id, &history)?;

        let mut aggregate = InventoryAggregate::empty(id);
        for stored in &history {
            let event: InventoryEvent = serde_json::from_value(stored.payload.clone())
                .map_err(|e| RepositoryError::Deserialize(e.to_string()))?;
            aggregate.apply(&event);
        }
        aggregate.check_invariant()?;

        debug!(
            inventory_id = %id,
            version = aggregate.version(),
            on_hand = aggregate.on_hand_quantity(),
            reserved = aggregate.reserved_quantity(),
            "inventory aggregate loaded"
        );
        Ok(aggregate)
    }

    fn apply_events(
        &self,
        aggregate: &mut InventoryAggregate,
    ) -> Result<Vec<StoredEvent>, RepositoryError> {
        if aggregate.uncommitted_events().is_empty() {
            return Ok(vec![]);
        }

        let id = aggregate.id_typed();
        let expected = ExpectedVersion::Exact(aggregate.persisted_version());
        let uncommitted = aggregate
            .uncommitted_events()
            .iter()
            .map(|ev| UncommittedEvent::from_typed(id.0, INVENTORY_AGGREGATE_TYPE, ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;
        aggregate.take_uncommitted_events();

        debug!(
            inventory_id = %id,
            version = aggregate.version(),
            events = committed.len(),
            "inventory events applied"
        );
        Ok(committed)
    }
}

fn validate_loaded_stream(id: InventoryId, stream: &[StoredEvent]) -> Result<(), RepositoryError> {
    // One event per revision, starting at 1, so the rehydrated version lines
    // up with the stream revision used by the next optimistic write.
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != id.0 {
            return Err(DomainError::invariant(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))
            .into());
        }
        let expected = idx as u64 + 1;
        if e.sequence_number != expected {
            return Err(DomainError::invariant(format!(
                "non-contiguous sequence_number in loaded stream (expected {expected}, found {})",
                e.sequence_number
            ))
            .into());
        }
    }
    Ok(())
}
