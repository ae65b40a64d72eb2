//! Infrastructure layer: persistence, resilience, audit and the inventory services.

pub mod broadcast;
pub mod clock;
pub mod config;
pub mod engine;
pub mod event_store;
pub mod idempotency;
pub mod recorder;
pub mod repository;
pub mod resilience;
pub mod services;

mod integration_tests;

pub use broadcast::{BusBroadcaster, InventoryBroadcaster, InventoryUpdate, NoopBroadcaster};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{InventoryEngine, RESERVATION_CIRCUIT};
pub use idempotency::{IdempotencyClaim, IdempotencyStore, InMemoryIdempotencyStore};
pub use recorder::{
    FailureReason, InMemoryOperationLog, OperationKind, OperationOutcome, OperationRecord,
    OperationRecorder,
};
pub use repository::{EventSourcedInventoryRepository, InventoryRepository, RepositoryError};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};
pub use services::ServiceContext;
