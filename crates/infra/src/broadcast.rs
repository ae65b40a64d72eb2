//! Real-time notification that an inventory record changed.
//!
//! Fire-and-forget: a failed broadcast is reported to the caller, which logs
//! it. It never fails the operation that triggered it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockguard_events::{EventBus, EventEnvelope};
use stockguard_inventory::{EventKind, InventoryId, InventorySnapshot};

use crate::repository::INVENTORY_AGGREGATE_TYPE;

/// What subscribers see after a committed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryUpdate {
    pub inventory_id: InventoryId,
    pub on_hand: i64,
    pub reserved: i64,
    pub available: i64,
    pub version: u64,
    pub kind: EventKind,
}

impl InventoryUpdate {
    pub fn new(snapshot: InventorySnapshot, kind: EventKind) -> Self {
        Self {
            inventory_id: snapshot.inventory_id,
            on_hand: snapshot.on_hand,
            reserved: snapshot.reserved,
            available: snapshot.available,
            version: snapshot.version,
            kind,
        }
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast publish failed: {0}")]
    Publish(String),
}

pub trait InventoryBroadcaster: Send + Sync {
    fn broadcast_inventory_update(
        &self,
        update: InventoryUpdate,
        at: DateTime<Utc>,
    ) -> Result<(), BroadcastError>;
}

impl<B> InventoryBroadcaster for Arc<B>
where
    B: InventoryBroadcaster + ?Sized,
{
    fn broadcast_inventory_update(
        &self,
        update: InventoryUpdate,
        at: DateTime<Utc>,
    ) -> Result<(), BroadcastError> {
        (**self).broadcast_inventory_update(update, at)
    }
}

/// Broadcaster that publishes enveloped updates onto an `EventBus`.
#[derive(Debug)]
pub struct BusBroadcaster<B> {
    bus: B,
}

impl<B> BusBroadcaster<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<B> InventoryBroadcaster for BusBroadcaster<B>
where
    B: EventBus<EventEnvelope<InventoryUpdate>>,
{
    fn broadcast_inventory_update(
        &self,
        update: InventoryUpdate,
        at: DateTime<Utc>,
    ) -> Result<(), BroadcastError> {
        let envelope = EventEnvelope::new(
            update.inventory_id.0,
            INVENTORY_AGGREGATE_TYPE,
            update.version,
            at,
            update,
        );
        self.bus
            .publish(envelope)
            .map_err(|e| BroadcastError::Publish(e.to_string()))
    }
}

/// Broadcaster that drops every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

impl InventoryBroadcaster for NoopBroadcaster {
    fn broadcast_inventory_update(
        &self,
        _update: InventoryUpdate,
        _at: DateTime<Utc>,
    ) -> Result<(), BroadcastError> {
        Ok(())
    }
}
