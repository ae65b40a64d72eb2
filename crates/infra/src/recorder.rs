//! Operation audit trail.
//!
//! Every service call ends in exactly one operation record (success, failure
//! or circuit-open) keyed by its `OperationId`. Replenishment additionally
//! emits a supply-chain event. Callers that need to know *why* a call returned
//! `false` read it back from here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockguard_core::OperationId;
use stockguard_inventory::{InventoryId, StockError};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Reserve,
    Release,
    Allocate,
    Replenish,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Reserve => "reserve",
            OperationKind::Release => "release",
            OperationKind::Allocate => "allocate",
            OperationKind::Replenish => "replenish",
        }
    }
}

impl core::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an operation returned `false`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidAmount,
    InsufficientStock,
    NothingReserved,
    ConcurrencyConflict,
    CircuitOpen,
    DuplicateInFlight,
    Exception,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::InvalidAmount => "invalid_amount",
            FailureReason::InsufficientStock => "insufficient_stock",
            FailureReason::NothingReserved => "nothing_reserved",
            FailureReason::ConcurrencyConflict => "concurrency_conflict",
            FailureReason::CircuitOpen => "circuit_open",
            FailureReason::DuplicateInFlight => "duplicate_in_flight",
            FailureReason::Exception => "exception",
        }
    }
}

impl core::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&StockError> for FailureReason {
    fn from(value: &StockError) -> Self {
        match value {
            StockError::InvalidAmount(_) | StockError::QuantityOverflow { .. } => {
                FailureReason::InvalidAmount
            }
            StockError::InsufficientStock { .. } => FailureReason::InsufficientStock,
            StockError::NothingReserved => FailureReason::NothingReserved,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    Success,
    Failure,
    CircuitOpen,
}

/// Identity of one service call, shared by every record it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMeta {
    pub operation_id: OperationId,
    pub inventory_id: InventoryId,
    pub kind: OperationKind,
    /// Amount as requested by the caller.
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation_id: OperationId,
    pub inventory_id: InventoryId,
    pub kind: OperationKind,
    pub amount: i64,
    pub outcome: OperationOutcome,
    pub reason: Option<FailureReason>,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl OperationRecord {
    fn from_meta(
        meta: &OperationMeta,
        outcome: OperationOutcome,
        reason: Option<FailureReason>,
        detail: Option<String>,
    ) -> Self {
        Self {
            operation_id: meta.operation_id.clone(),
            inventory_id: meta.inventory_id,
            kind: meta.kind,
            amount: meta.amount,
            outcome,
            reason,
            detail,
            recorded_at: meta.occurred_at,
        }
    }
}

/// Supply arriving at an inventory record, kept apart from the generic audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyChainEvent {
    pub operation_id: OperationId,
    pub inventory_id: InventoryId,
    /// e.g. `stock_replenished`
    pub kind: String,
    pub amount: i64,
    pub source: String,
    pub metadata: JsonValue,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("operation recorder unavailable: {0}")]
    Unavailable(String),
}

pub trait OperationRecorder: Send + Sync {
    /// `amount` is what actually moved (after clamping).
    fn record_successful_operation(
        &self,
        meta: &OperationMeta,
        amount: i64,
    ) -> Result<(), RecorderError>;

    fn record_failed_operation(
        &self,
        meta: &OperationMeta,
        reason: FailureReason,
        detail: Option<&str>,
    ) -> Result<(), RecorderError>;

    fn record_circuit_breaker_failure(
        &self,
        meta: &OperationMeta,
        error: &str,
    ) -> Result<(), RecorderError>;

    fn record_supply_chain_event(&self, event: SupplyChainEvent) -> Result<(), RecorderError>;
}

impl<R> OperationRecorder for Arc<R>
where
    R: OperationRecorder + ?Sized,
{
    fn record_successful_operation(
        &self,
        meta: &OperationMeta,
        amount: i64,
    ) -> Result<(), RecorderError> {
        (**self).record_successful_operation(meta, amount)
    }

    fn record_failed_operation(
        &self,
        meta: &OperationMeta,
        reason: FailureReason,
        detail: Option<&str>,
    ) -> Result<(), RecorderError> {
        (**self).record_failed_operation(meta, reason, detail)
    }

    fn record_circuit_breaker_failure(
        &self,
        meta: &OperationMeta,
        error: &str,
    ) -> Result<(), RecorderError> {
        (**self).record_circuit_breaker_failure(meta, error)
    }

    fn record_supply_chain_event(&self, event: SupplyChainEvent) -> Result<(), RecorderError> {
        (**self).record_supply_chain_event(event)
    }
}

/// In-memory audit trail for tests and embedded use.
///
/// Unbounded unless built with `with_retention`, in which case only the most
/// recent entries of each list are kept.
#[derive(Debug, Default)]
pub struct InMemoryOperationLog {
    records: Mutex<Vec<OperationRecord>>,
    supply_chain: Mutex<Vec<SupplyChainEvent>>,
    unavailable: AtomicBool,
    retention: Option<usize>,
}

impl InMemoryOperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max_entries` operation records and supply-chain events.
    pub fn with_retention(max_entries: usize) -> Self {
        Self {
            retention: Some(max_entries.max(1)),
            ..Self::default()
        }
    }

    /// Make every write fail, to check that recording stays best-effort.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<OperationRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn records_for(&self, operation_id: &OperationId) -> Vec<OperationRecord> {
        self.records()
            .into_iter()
            .filter(|r| &r.operation_id == operation_id)
            .collect()
    }

    pub fn last(&self) -> Option<OperationRecord> {
        self.records.lock().ok().and_then(|r| r.last().cloned())
    }

    pub fn count_by_outcome(&self, outcome: OperationOutcome) -> usize {
        self.records()
            .iter()
            .filter(|r| r.outcome == outcome)
            .count()
    }

    pub fn count_by_reason(&self, reason: FailureReason) -> usize {
        self.records()
            .iter()
            .filter(|r| r.reason == Some(reason))
            .count()
    }

    pub fn supply_chain_events(&self) -> Vec<SupplyChainEvent> {
        self.supply_chain.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn push(&self, record: OperationRecord) -> Result<(), RecorderError> {
        self.check_available()?;
        self.records
            .lock()
            .map_err(|_| RecorderError::Unavailable("lock poisoned".to_string()))
            .map(|mut records| self.append(&mut *records, record))
    }

    fn append<T>(&self, entries: &mut Vec<T>, entry: T) {
        entries.push(entry);
        if let Some(max) = self.retention {
            let excess = entries.len().saturating_sub(max);
            entries.drain(..excess);
        }
    }

    fn check_available(&self) -> Result<(), RecorderError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RecorderError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }
}

impl OperationRecorder for InMemoryOperationLog {
    fn record_successful_operation(
        &self,
        meta: &OperationMeta,
        amount: i64,
    ) -> Result<(), RecorderError> {
        let mut record = OperationRecord::from_meta(meta, OperationOutcome::Success, None, None);
        record.amount = amount;
        self.push(record)
    }

    fn record_failed_operation(
        &self,
        meta: &OperationMeta,
        reason: FailureReason,
        detail: Option<&str>,
    ) -> Result<(), RecorderError> {
        self.push(OperationRecord::from_meta(
            meta,
            OperationOutcome::Failure,
            Some(reason),
            detail.map(str::to_string),
        ))
    }

    fn record_circuit_breaker_failure(
        &self,
        meta: &OperationMeta,
        error: &str,
    ) -> Result<(), RecorderError> {
        self.push(OperationRecord::from_meta(
            meta,
            OperationOutcome::CircuitOpen,
            Some(FailureReason::CircuitOpen),
            Some(error.to_string()),
        ))
    }

    fn record_supply_chain_event(&self, event: SupplyChainEvent) -> Result<(), RecorderError> {
        self.check_available()?;
        self.supply_chain
            .lock()
            .map_err(|_| RecorderError::Unavailable("lock poisoned".to_string()))
            .map(|mut events| self.append(&mut *events, event))
    }
}
