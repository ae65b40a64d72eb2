//! Inventory mutation services.
//!
//! Each service call follows the same pipeline:
//!
//! ```text
//! resolve operation id → idempotency gate
//!   → [breaker] → retry { load → decide → execute → apply_events }
//!   → record outcome → broadcast → complete / abandon claim
//! ```
//!
//! Only the reservation service runs behind the circuit breaker. Every public
//! method returns `bool` and never panics on collaborator failure; the reason
//! for a `false` is in the operation record.

use std::sync::Arc;

use crate::broadcast::{InventoryBroadcaster, NoopBroadcaster};
use crate::clock::{Clock, SystemClock};
use crate::idempotency::{IdempotencyStore, InMemoryIdempotencyStore};
use crate::recorder::{InMemoryOperationLog, OperationRecorder};
use crate::repository::InventoryRepository;
use crate::resilience::RetryPolicy;

pub mod allocation;
mod pipeline;
pub mod release;
pub mod replenishment;
pub mod reservation;

pub use allocation::InventoryAllocationService;
pub use release::InventoryReleaseService;
pub use replenishment::InventoryReplenishmentService;
pub use reservation::InventoryReservationService;

/// Collaborators shared by all services.
///
/// Cheap to clone; every collaborator is behind an `Arc`.
#[derive(Clone)]
pub struct ServiceContext {
    pub repository: Arc<dyn InventoryRepository>,
    pub recorder: Arc<dyn OperationRecorder>,
    pub broadcaster: Arc<dyn InventoryBroadcaster>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub clock: Arc<dyn Clock>,
    pub retry: RetryPolicy,
}

impl ServiceContext {
    /// Context over `repository` with in-process defaults for everything else.
    pub fn new(repository: Arc<dyn InventoryRepository>) -> Self {
        Self {
            repository,
            recorder: Arc::new(InMemoryOperationLog::new()),
            broadcaster: Arc::new(NoopBroadcaster),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn OperationRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn InventoryBroadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn with_idempotency(mut self, idempotency: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency = idempotency;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl core::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
