//! Domain events and their distribution.
//!
//! Events are facts. They are stored first and fanned out to subscribers
//! second; this crate only covers the mechanics, never storage.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
