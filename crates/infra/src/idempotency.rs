//! Dedup table for caller-supplied operation ids.
//!
//! ```text
//! begin(op) ─┬─ Fresh        → run the operation
//!            │                  ├─ success → complete(op, result)
//!            │                  └─ failure → abandon(op)   (caller may retry)
//!            ├─ InFlight     → refuse (duplicate_in_flight)
//!            └─ Completed(r) → replay r, touch nothing
//! ```
//!
//! Only successful operations are remembered. Generated ids never enter the
//! table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockguard_core::OperationId;
use stockguard_inventory::InventoryId;

use crate::recorder::OperationKind;

/// The remembered result of a successful operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedOperation {
    pub inventory_id: InventoryId,
    pub kind: OperationKind,
    /// Amount the caller asked for.
    pub requested: i64,
    /// Units that actually moved.
    pub amount: i64,
    /// Order, shipment or supply source the operation was made for.
    pub reference: String,
    pub completed_at: DateTime<Utc>,
}

impl CompletedOperation {
    /// Whether a resubmission asks for exactly this operation again.
    pub fn is_same_request(
        &self,
        inventory_id: InventoryId,
        kind: OperationKind,
        requested: i64,
        reference: &str,
    ) -> bool {
        self.inventory_id == inventory_id
            && self.kind == kind
            && self.requested == requested
            && self.reference == reference
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyClaim {
    /// First sighting; the caller now owns the key.
    Fresh,
    /// Another call with the same key is still running.
    InFlight,
    Completed(CompletedOperation),
}

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("idempotency store unavailable: {0}")]
    Unavailable(String),
}

pub trait IdempotencyStore: Send + Sync {
    fn begin(&self, operation_id: &OperationId) -> Result<IdempotencyClaim, IdempotencyError>;

    fn complete(
        &self,
        operation_id: &OperationId,
        result: CompletedOperation,
    ) -> Result<(), IdempotencyError>;

    /// Drop an in-flight claim so the key can be used again.
    fn abandon(&self, operation_id: &OperationId) -> Result<(), IdempotencyError>;
}

impl<S> IdempotencyStore for Arc<S>
where
    S: IdempotencyStore + ?Sized,
{
    fn begin(&self, operation_id: &OperationId) -> Result<IdempotencyClaim, IdempotencyError> {
        (**self).begin(operation_id)
    }

    fn complete(
        &self,
        operation_id: &OperationId,
        result: CompletedOperation,
    ) -> Result<(), IdempotencyError> {
        (**self).complete(operation_id, result)
    }

    fn abandon(&self, operation_id: &OperationId) -> Result<(), IdempotencyError> {
        (**self).abandon(operation_id)
    }
}

#[derive(Debug, Clone)]
enum Entry {
    InFlight,
    Completed(CompletedOperation),
}

/// In-memory dedup table for tests and embedded use.
///
/// Completed entries stay until `prune_completed_before` drops them; callers
/// that run for long should prune on a schedule matching how long clients
/// may resubmit.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    entries: Mutex<HashMap<OperationId, Entry>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget completed operations finished before `cutoff`. In-flight claims
    /// are kept. Returns how many entries were dropped.
    pub fn prune_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, IdempotencyError> {
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|_, entry| match entry {
            Entry::InFlight => true,
            Entry::Completed(done) => done.completed_at >= cutoff,
        });
        Ok(before - entries.len())
    }

    fn entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<OperationId, Entry>>, IdempotencyError> {
        self.entries
            .lock()
            .map_err(|_| IdempotencyError::Unavailable("lock poisoned".to_string()))
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn begin(&self, operation_id: &OperationId) -> Result<IdempotencyClaim, IdempotencyError> {
        let mut entries = self.entries()?;
        let claim = match entries.get(operation_id) {
            None => {
                entries.insert(operation_id.clone(), Entry::InFlight);
                IdempotencyClaim::Fresh
            }
            Some(Entry::InFlight) => IdempotencyClaim::InFlight,
            Some(Entry::Completed(result)) => IdempotencyClaim::Completed(result.clone()),
        };
        Ok(claim)
    }

    fn complete(
        &self,
        operation_id: &OperationId,
        result: CompletedOperation,
    ) -> Result<(), IdempotencyError> {
        self.entries()?
            .insert(operation_id.clone(), Entry::Completed(result));
        Ok(())
    }

    fn abandon(&self, operation_id: &OperationId) -> Result<(), IdempotencyError> {
        let mut entries = self.entries()?;
        if matches!(entries.get(operation_id), Some(Entry::InFlight)) {
            entries.remove(operation_id);
        }
        Ok(())
    }
}
