use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockguard_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, OrderId, ShipmentId,
};

use crate::command::{AllocateStock, InventoryCommand, ReleaseStock, ReplenishStock, ReserveStock};
use crate::error::StockError;
use crate::event::{
    InventoryEvent, StockAllocated, StockReleased, StockReplenished, StockReserved,
};

/// Inventory record identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryId(pub AggregateId);

impl InventoryId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for InventoryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Result of asking whether `amount` units can be reserved right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentCheck {
    pub can_fulfill: bool,
    pub reason: Option<StockError>,
}

impl FulfillmentCheck {
    fn ok() -> Self {
        Self {
            can_fulfill: true,
            reason: None,
        }
    }

    fn refused(reason: StockError) -> Self {
        Self {
            can_fulfill: false,
            reason: Some(reason),
        }
    }

    pub fn into_result(self) -> Result<(), StockError> {
        match self.reason {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}

/// Read-only view of an inventory record's counters.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub inventory_id: InventoryId,
    pub on_hand: i64,
    pub reserved: i64,
    pub available: i64,
    pub version: u64,
}

/// Aggregate root: one inventory record.
///
/// Invariant after every successful mutation:
/// `0 <= reserved_quantity <= on_hand_quantity`.
///
/// The aggregate lives for one operation: it is loaded (or rehydrated),
/// mutated in memory, handed to the repository which drains
/// `uncommitted_events` in the same write that persists the new version, and
/// then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryAggregate {
    id: InventoryId,
    on_hand_quantity: i64,
    reserved_quantity: i64,
    version: u64,
    uncommitted_events: Vec<InventoryEvent>,
}

impl InventoryAggregate {
    /// Create an empty aggregate (no stock, version 0), ready for rehydration.
    pub fn empty(id: InventoryId) -> Self {
        Self {
            id,
            on_hand_quantity: 0,
            reserved_quantity: 0,
            version: 0,
            uncommitted_events: Vec::new(),
        }
    }

    /// Build an aggregate from already-persisted counters.
    pub fn from_snapshot(
        id: InventoryId,
        on_hand_quantity: i64,
        reserved_quantity: i64,
        version: u64,
    ) -> DomainResult<Self> {
        let aggregate = Self {
            id,
            on_hand_quantity,
            reserved_quantity,
            version,
            uncommitted_events: Vec::new(),
        };
        aggregate.check_invariant()?;
        Ok(aggregate)
    }

    pub fn id_typed(&self) -> InventoryId {
        self.id
    }

    pub fn on_hand_quantity(&self) -> i64 {
        self.on_hand_quantity
    }

    pub fn reserved_quantity(&self) -> i64 {
        self.reserved_quantity
    }

    pub fn available_quantity(&self) -> i64 {
        self.on_hand_quantity - self.reserved_quantity
    }

    pub fn snapshot(&self) -> InventorySnapshot {
        InventorySnapshot {
            inventory_id: self.id,
            on_hand: self.on_hand_quantity,
            reserved: self.reserved_quantity,
            available: self.available_quantity(),
            version: self.version,
        }
    }

    pub fn uncommitted_events(&self) -> &[InventoryEvent] {
        &self.uncommitted_events
    }

    /// Version of the state the uncommitted events were decided against.
    ///
    /// This is the expected stream revision for the optimistic write.
    pub fn persisted_version(&self) -> u64 {
        self.version - self.uncommitted_events.len() as u64
    }

    /// Hand the pending events to the persistence boundary.
    pub fn take_uncommitted_events(&mut self) -> Vec<InventoryEvent> {
        std::mem::take(&mut self.uncommitted_events)
    }

    pub fn check_invariant(&self) -> DomainResult<()> {
        if self.reserved_quantity < 0 {
            return Err(DomainError::invariant("reserved quantity cannot go negative"));
        }
        if self.reserved_quantity > self.on_hand_quantity {
            return Err(DomainError::invariant(format!(
                "reserved quantity {} exceeds on-hand quantity {}",
                self.reserved_quantity, self.on_hand_quantity
            )));
        }
        Ok(())
    }

    pub fn can_fulfill(&self, amount: i64) -> FulfillmentCheck {
        if amount <= 0 {
            return FulfillmentCheck::refused(StockError::InvalidAmount(amount));
        }
        let available = self.available_quantity();
        if available < amount {
            return FulfillmentCheck::refused(StockError::InsufficientStock {
                requested: amount,
                available,
            });
        }
        FulfillmentCheck::ok()
    }

    /// Decide, apply and record `command`.
    ///
    /// On error nothing changes and no event is recorded. On success exactly
    /// one event is appended to `uncommitted_events`.
    pub fn execute(&mut self, command: &InventoryCommand) -> Result<InventoryEvent, StockError> {
        let event = self.decide(command)?;
        self.apply(&event);
        self.uncommitted_events.push(event.clone());
        Ok(event)
    }

    pub fn reserve(&mut self, amount: i64, order_id: OrderId, expires_at: DateTime<Utc>) -> bool {
        let command = InventoryCommand::Reserve(ReserveStock {
            amount,
            order_id,
            expires_at,
            occurred_at: Utc::now(),
        });
        self.execute(&command).is_ok()
    }

    pub fn release(&mut self, amount: i64, order_id: OrderId) -> bool {
        let command = InventoryCommand::Release(ReleaseStock {
            amount,
            order_id,
            occurred_at: Utc::now(),
        });
        self.execute(&command).is_ok()
    }

    pub fn allocate(&mut self, amount: i64, order_id: OrderId, shipment_id: ShipmentId) -> bool {
        let command = InventoryCommand::Allocate(AllocateStock {
            amount,
            order_id,
            shipment_id,
            occurred_at: Utc::now(),
        });
        self.execute(&command).is_ok()
    }

    pub fn replenish(&mut self, amount: i64, source: impl Into<String>) -> bool {
        let command = InventoryCommand::Replenish(ReplenishStock {
            amount,
            source: source.into(),
            occurred_at: Utc::now(),
        });
        self.execute(&command).is_ok()
    }
}

impl AggregateRoot for InventoryAggregate {
    type Id = InventoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for InventoryAggregate {
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = StockError;

    fn apply(&mut self, event: &Self::Event) {
        // Saturating: a corrupt stream is caught by the repository's invariant
        // check after rehydration, not here.
        match event {
            InventoryEvent::Reserved(e) => {
                self.reserved_quantity = self.reserved_quantity.saturating_add(e.amount);
            }
            InventoryEvent::Released(e) => {
                self.reserved_quantity = self.reserved_quantity.saturating_sub(e.amount);
            }
            InventoryEvent::Allocated(e) => {
                self.reserved_quantity = self.reserved_quantity.saturating_sub(e.amount);
                self.on_hand_quantity = self.on_hand_quantity.saturating_sub(e.amount);
            }
            InventoryEvent::Replenished(e) => {
                self.on_hand_quantity = self.on_hand_quantity.saturating_add(e.amount);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        Ok(vec![self.decide(command)?])
    }
}

impl InventoryAggregate {
    /// Every accepted command yields exactly one event.
    fn decide(&self, command: &InventoryCommand) -> Result<InventoryEvent, StockError> {
        match command {
            InventoryCommand::Reserve(cmd) => self.handle_reserve(cmd),
            InventoryCommand::Release(cmd) => self.handle_release(cmd),
            InventoryCommand::Allocate(cmd) => self.handle_allocate(cmd),
            InventoryCommand::Replenish(cmd) => self.handle_replenish(cmd),
        }
    }

    fn ensure_positive(amount: i64) -> Result<(), StockError> {
        if amount <= 0 {
            return Err(StockError::InvalidAmount(amount));
        }
        Ok(())
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<InventoryEvent, StockError> {
        self.can_fulfill(cmd.amount).into_result()?;

        Ok(InventoryEvent::Reserved(StockReserved {
            inventory_id: self.id,
            amount: cmd.amount,
            order_id: cmd.order_id,
            expires_at: cmd.expires_at,
            occurred_at: cmd.occurred_at,
        }))
    }

    fn handle_release(&self, cmd: &ReleaseStock) -> Result<InventoryEvent, StockError> {
        Self::ensure_positive(cmd.amount)?;

        let released = cmd.amount.min(self.reserved_quantity);
        if released <= 0 {
            return Err(StockError::NothingReserved);
        }

        Ok(InventoryEvent::Released(StockReleased {
            inventory_id: self.id,
            requested: cmd.amount,
            amount: released,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        }))
    }

    fn handle_allocate(&self, cmd: &AllocateStock) -> Result<InventoryEvent, StockError> {
        Self::ensure_positive(cmd.amount)?;

        if cmd.amount > self.reserved_quantity {
            return Err(StockError::InsufficientStock {
                requested: cmd.amount,
                available: self.reserved_quantity,
            });
        }

        Ok(InventoryEvent::Allocated(StockAllocated {
            inventory_id: self.id,
            amount: cmd.amount,
            order_id: cmd.order_id,
            shipment_id: cmd.shipment_id,
            occurred_at: cmd.occurred_at,
        }))
    }

    fn handle_replenish(&self, cmd: &ReplenishStock) -> Result<InventoryEvent, StockError> {
        Self::ensure_positive(cmd.amount)?;

        if self.on_hand_quantity.checked_add(cmd.amount).is_none() {
            return Err(StockError::QuantityOverflow {
                current: self.on_hand_quantity,
                amount: cmd.amount,
            });
        }

        Ok(InventoryEvent::Replenished(StockReplenished {
            inventory_id: self.id,
            amount: cmd.amount,
            source: cmd.source.clone(),
            occurred_at: cmd.occurred_at,
        }))
    }
}
