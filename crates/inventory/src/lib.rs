//! Inventory domain module (event-sourced).
//!
//! Business rules for one stock record: on-hand vs. reserved units and the
//! events that move them. Deterministic domain logic only (no IO, no storage).

pub mod aggregate;
pub mod command;
pub mod error;
pub mod event;

pub use aggregate::{FulfillmentCheck, InventoryAggregate, InventoryId, InventorySnapshot};
pub use command::{AllocateStock, InventoryCommand, ReleaseStock, ReplenishStock, ReserveStock};
pub use error::StockError;
pub use event::{
    EventKind, InventoryEvent, StockAllocated, StockReleased, StockReplenished, StockReserved,
};
