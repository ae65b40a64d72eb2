//! `InventoryEngine`: the four services wired over one set of collaborators.
//!
//! The engine owns the circuit breaker for its protected resource class. Two
//! engines never share breaker state unless the caller builds them from the
//! same `Arc<CircuitBreaker>` via `with_reservation_breaker`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use stockguard_core::{OrderId, ShipmentId};
use stockguard_inventory::{InventoryId, InventorySnapshot};

use crate::config::EngineConfig;
use crate::event_store::InMemoryEventStore;
use crate::repository::{EventSourcedInventoryRepository, RepositoryError};
use crate::resilience::CircuitBreaker;
use crate::services::{
    InventoryAllocationService, InventoryReleaseService, InventoryReplenishmentService,
    InventoryReservationService, ServiceContext,
};

/// Name of the breaker guarding reservations.
pub const RESERVATION_CIRCUIT: &str = "inventory_reservation";

#[derive(Debug, Clone)]
pub struct InventoryEngine {
    ctx: ServiceContext,
    reservation_breaker: Arc<CircuitBreaker>,
    reservation: InventoryReservationService,
    allocation: InventoryAllocationService,
    release: InventoryReleaseService,
    replenishment: InventoryReplenishmentService,
}

impl InventoryEngine {
    /// Build an engine. `config.retry` replaces the context's retry policy.
    pub fn new(ctx: ServiceContext, config: &EngineConfig) -> Self {
        let breaker = Arc::new(CircuitBreaker::with_clock(
            RESERVATION_CIRCUIT,
            config.breaker.clone(),
            ctx.clock.clone(),
        ));
        Self::assemble(ctx.with_retry(config.retry.clone()), breaker, config)
    }

    /// Engine over a fresh in-memory event store.
    ///
    /// Records go to an internal `InMemoryOperationLog` that nothing reads.
    /// To inspect the audit trail, or to bound it, build the context with
    /// `ServiceContext::with_recorder` and use `new`.
    pub fn in_memory(config: &EngineConfig) -> Self {
        let repository = EventSourcedInventoryRepository::new(InMemoryEventStore::new());
        Self::new(ServiceContext::new(Arc::new(repository)), config)
    }

    /// Reuse an existing breaker, e.g. one shared with another engine.
    pub fn with_reservation_breaker(self, breaker: Arc<CircuitBreaker>, config: &EngineConfig) -> Self {
        Self::assemble(self.ctx, breaker, config)
    }

    fn assemble(ctx: ServiceContext, breaker: Arc<CircuitBreaker>, config: &EngineConfig) -> Self {
        info!(
            circuit = breaker.name(),
            failure_threshold = breaker.config().failure_threshold,
            recovery_timeout_secs = breaker.config().recovery_timeout.as_secs(),
            max_attempts = ctx.retry.max_attempts,
            "inventory engine configured"
        );

        Self {
            reservation: InventoryReservationService::new(ctx.clone(), breaker.clone())
                .with_reservation_ttl(config.reservation_ttl),
            allocation: InventoryAllocationService::new(ctx.clone()),
            release: InventoryReleaseService::new(ctx.clone()),
            replenishment: InventoryReplenishmentService::new(ctx.clone()),
            reservation_breaker: breaker,
            ctx,
        }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    pub fn reservation_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.reservation_breaker
    }

    pub fn reserve(
        &self,
        inventory_id: InventoryId,
        amount: i64,
        order_id: OrderId,
        expires_at: Option<DateTime<Utc>>,
        correlation_id: Option<&str>,
    ) -> bool {
        self.reservation
            .reserve(inventory_id, amount, order_id, expires_at, correlation_id)
    }

    pub fn release(
        &self,
        inventory_id: InventoryId,
        amount: i64,
        order_id: OrderId,
        correlation_id: Option<&str>,
    ) -> bool {
        self.release
            .release(inventory_id, amount, order_id, correlation_id)
    }

    pub fn allocate(
        &self,
        inventory_id: InventoryId,
        amount: i64,
        order_id: OrderId,
        shipment_id: ShipmentId,
        correlation_id: Option<&str>,
    ) -> bool {
        self.allocation
            .allocate(inventory_id, amount, order_id, shipment_id, correlation_id)
    }

    pub fn replenish(
        &self,
        inventory_id: InventoryId,
        amount: i64,
        source: &str,
        correlation_id: Option<&str>,
    ) -> bool {
        self.replenishment
            .replenish(inventory_id, amount, source, correlation_id)
    }

    /// Current counters of a record. Unknown ids read as empty at version 0.
    pub fn snapshot(&self, inventory_id: InventoryId) -> Result<InventorySnapshot, RepositoryError> {
        Ok(self.ctx.repository.load_or_create(inventory_id)?.snapshot())
    }
}
