//! Append-only event store boundary.
//!
//! Storage-agnostic: an in-memory implementation backs tests and embedded
//! use, and a fault-injecting wrapper exercises the resilience paths.

pub mod faulty;
pub mod in_memory;
pub mod r#trait;

pub use faulty::FaultInjectingEventStore;
pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
