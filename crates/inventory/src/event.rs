use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockguard_core::{OrderId, ShipmentId};
use stockguard_events::Event;

use crate::aggregate::InventoryId;

/// Event: StockReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub inventory_id: InventoryId,
    pub amount: i64,
    pub order_id: OrderId,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReleased.
///
/// `amount` is what was actually released; `requested` is what the caller
/// asked for before clamping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub inventory_id: InventoryId,
    pub requested: i64,
    pub amount: i64,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAllocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAllocated {
    pub inventory_id: InventoryId,
    pub amount: i64,
    pub order_id: OrderId,
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReplenished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReplenished {
    pub inventory_id: InventoryId,
    pub amount: i64,
    pub source: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    Reserved(StockReserved),
    Released(StockReleased),
    Allocated(StockAllocated),
    Replenished(StockReplenished),
}

/// Coarse kind of a stock mutation, shared by events and operation records.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Reserved,
    Released,
    Allocated,
    Replenished,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Reserved => "reserved",
            EventKind::Released => "released",
            EventKind::Allocated => "allocated",
            EventKind::Replenished => "replenished",
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl InventoryEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InventoryEvent::Reserved(_) => EventKind::Reserved,
            InventoryEvent::Released(_) => EventKind::Released,
            InventoryEvent::Allocated(_) => EventKind::Allocated,
            InventoryEvent::Replenished(_) => EventKind::Replenished,
        }
    }

    /// Units that actually moved.
    pub fn amount(&self) -> i64 {
        match self {
            InventoryEvent::Reserved(e) => e.amount,
            InventoryEvent::Released(e) => e.amount,
            InventoryEvent::Allocated(e) => e.amount,
            InventoryEvent::Replenished(e) => e.amount,
        }
    }

    pub fn inventory_id(&self) -> InventoryId {
        match self {
            InventoryEvent::Reserved(e) => e.inventory_id,
            InventoryEvent::Released(e) => e.inventory_id,
            InventoryEvent::Allocated(e) => e.inventory_id,
            InventoryEvent::Replenished(e) => e.inventory_id,
        }
    }
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::Reserved(_) => "inventory.stock.reserved",
            InventoryEvent::Released(_) => "inventory.stock.released",
            InventoryEvent::Allocated(_) => "inventory.stock.allocated",
            InventoryEvent::Replenished(_) => "inventory.stock.replenished",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::Reserved(e) => e.occurred_at,
            InventoryEvent::Released(e) => e.occurred_at,
            InventoryEvent::Allocated(e) => e.occurred_at,
            InventoryEvent::Replenished(e) => e.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn released() -> InventoryEvent {
        InventoryEvent::Released(StockReleased {
            inventory_id: InventoryId::generate(),
            requested: 10,
            amount: 4,
            order_id: OrderId::new(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn stored_payload_is_tagged_by_variant() {
        let event = released();
        let json = serde_json::to_value(&event).unwrap();

        let body = json.get("Released").expect("variant tag");
        assert_eq!(body["requested"], 10);
        assert_eq!(body["amount"], 4);

        let back: InventoryEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn kind_serializes_like_its_display_form() {
        for kind in [
            EventKind::Reserved,
            EventKind::Released,
            EventKind::Allocated,
            EventKind::Replenished,
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
        }
    }

    #[test]
    fn event_metadata_follows_the_variant() {
        let event = released();
        assert_eq!(event.kind(), EventKind::Released);
        assert_eq!(event.amount(), 4);
        assert_eq!(event.event_type(), "inventory.stock.released");
        assert_eq!(event.version(), 1);
    }
}
