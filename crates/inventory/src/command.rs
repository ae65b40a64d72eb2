use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockguard_core::{OrderId, ShipmentId};

/// Command: hold stock for a pending order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub amount: i64,
    pub order_id: OrderId,
    /// Consumed by an external expiry sweeper; not enforced here.
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: give a hold back to available stock.
///
/// `amount` is clamped to what is currently reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub amount: i64,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: convert reserved stock into a shipment (stock leaves the building).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateStock {
    pub amount: i64,
    pub order_id: OrderId,
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: add incoming supply to on-hand stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplenishStock {
    pub amount: i64,
    /// Where the supply came from (purchase order, return, cycle count, ...).
    pub source: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    Reserve(ReserveStock),
    Release(ReleaseStock),
    Allocate(AllocateStock),
    Replenish(ReplenishStock),
}

impl InventoryCommand {
    /// Amount as requested by the caller (before any clamping).
    pub fn amount(&self) -> i64 {
        match self {
            InventoryCommand::Reserve(c) => c.amount,
            InventoryCommand::Release(c) => c.amount,
            InventoryCommand::Allocate(c) => c.amount,
            InventoryCommand::Replenish(c) => c.amount,
        }
    }
}
