//! Reserve stock for an order.
//!
//! The only service that runs behind a circuit breaker. An open breaker
//! rejects the call before the store is touched.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use stockguard_core::OrderId;
use stockguard_inventory::{InventoryCommand, InventoryId, ReserveStock};

use super::ServiceContext;
use super::pipeline::Outcome;
use crate::recorder::OperationKind;
use crate::resilience::{CircuitBreaker, CircuitBreakerError};

/// Default hold time for a reservation without an explicit expiry.
pub const DEFAULT_RESERVATION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct InventoryReservationService {
    ctx: ServiceContext,
    breaker: Arc<CircuitBreaker>,
    reservation_ttl: Duration,
}

impl InventoryReservationService {
    pub fn new(ctx: ServiceContext, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            ctx,
            breaker,
            reservation_ttl: Duration::hours(DEFAULT_RESERVATION_TTL_HOURS),
        }
    }

    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Hold `amount` units of `inventory_id` for `order_id`.
    ///
    /// `expires_at` defaults to now plus the reservation TTL; it is stored on
    /// the event for an external sweeper and not enforced here.
    pub fn reserve(
        &self,
        inventory_id: InventoryId,
        amount: i64,
        order_id: OrderId,
        expires_at: Option<DateTime<Utc>>,
        correlation_id: Option<&str>,
    ) -> bool {
        let op = self
            .ctx
            .resolve(inventory_id, OperationKind::Reserve, amount, order_id.to_string(), correlation_id);
        if let Some(result) = self.ctx.gate(&op) {
            return result;
        }

        let now = op.meta.occurred_at;
        let expires_at = expires_at.unwrap_or_else(|| {
            now.checked_add_signed(self.reservation_ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        });

        let result = self.breaker.execute(|| {
            self.ctx.mutate(&op.meta, |aggregate| {
                aggregate.can_fulfill(amount).into_result()?;
                Ok(InventoryCommand::Reserve(ReserveStock {
                    amount,
                    order_id,
                    expires_at,
                    occurred_at: now,
                }))
            })
        });

        let outcome = match result {
            Ok(mutation) => Outcome::Mutation(mutation),
            Err(CircuitBreakerError::Inner(e)) => Outcome::Backend(e),
            Err(rejection) => Outcome::CircuitRejected(rejection.to_string()),
        };

        self.ctx.finish(&op, outcome).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::event_store::EventStore;
    use crate::recorder::{FailureReason, OperationOutcome};
    use crate::resilience::{CircuitBreakerConfig, CircuitState};
    use crate::services::test_support::Harness;
    use stockguard_core::AggregateRoot;
    use stockguard_events::EventBus;
    use stockguard_inventory::InventoryEvent;

    fn service(h: &Harness, threshold: u32) -> InventoryReservationService {
        let breaker = CircuitBreaker::with_clock(
            "inventory_reservation",
            CircuitBreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_recovery_timeout(std::time::Duration::from_secs(30)),
            h.clock.clone(),
        );
        InventoryReservationService::new(h.ctx.clone(), Arc::new(breaker))
    }

    #[test]
    fn reserve_within_available_succeeds_and_is_recorded() {
        let h = Harness::new();
        let svc = service(&h, 5);
        let id = h.seed(100, 0);

        assert!(svc.reserve(id, 30, OrderId::new(), None, Some("order-1")));

        let aggregate = h.load(id);
        assert_eq!(aggregate.reserved_quantity(), 30);
        let record = h.log.last().unwrap();
        assert_eq!(record.outcome, OperationOutcome::Success);
        assert_eq!(record.operation_id.as_str(), "order-1");
        assert_eq!(record.amount, 30);
    }

    #[test]
    fn insufficient_stock_is_refused_without_mutation() {
        let h = Harness::new();
        let svc = service(&h, 5);
        let id = h.seed(100, 30);

        assert!(!svc.reserve(id, 80, OrderId::new(), None, None));

        let aggregate = h.load(id);
        assert_eq!(aggregate.reserved_quantity(), 30);
        assert_eq!(aggregate.version(), 2);
        assert_eq!(h.log.last().unwrap().reason, Some(FailureReason::InsufficientStock));
    }

    #[test]
    fn non_positive_amount_is_recorded_as_invalid() {
        let h = Harness::new();
        let svc = service(&h, 5);
        let id = h.seed(10, 0);

        assert!(!svc.reserve(id, 0, OrderId::new(), None, None));
        assert_eq!(h.log.last().unwrap().reason, Some(FailureReason::InvalidAmount));
    }

    #[test]
    fn missing_expiry_defaults_to_ttl_from_now() {
        let h = Harness::new();
        let svc = service(&h, 5).with_reservation_ttl(Duration::hours(2));
        let id = h.seed(10, 0);
        let subscription = h.bus.subscribe();
        let now = h.clock.now();

        assert!(svc.reserve(id, 1, OrderId::new(), None, None));

        let stored = h.store.inner().load_stream(id.0).unwrap();
        let event: InventoryEvent =
            serde_json::from_value(stored.last().unwrap().payload.clone()).unwrap();
        match event {
            InventoryEvent::Reserved(e) => assert_eq!(e.expires_at, now + Duration::hours(2)),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(subscription.drain().len(), 1);
    }

    #[test]
    fn store_failures_open_the_breaker_and_skip_the_store() {
        let h = Harness::new();
        let svc = service(&h, 2);
        let id = h.seed(100, 0);

        h.store.set_unavailable(true);
        assert!(!svc.reserve(id, 1, OrderId::new(), None, None));
        assert!(!svc.reserve(id, 1, OrderId::new(), None, None));
        assert_eq!(svc.breaker().state(), CircuitState::Open);
        assert_eq!(h.log.count_by_reason(FailureReason::Exception), 2);

        let loads_before = h.store.loads();
        assert!(!svc.reserve(id, 1, OrderId::new(), None, None));
        assert_eq!(h.store.loads(), loads_before);
        assert_eq!(h.log.last().unwrap().outcome, OperationOutcome::CircuitOpen);
    }

    #[test]
    fn business_refusals_do_not_trip_the_breaker() {
        let h = Harness::new();
        let svc = service(&h, 1);
        let id = h.seed(1, 0);

        assert!(!svc.reserve(id, 5, OrderId::new(), None, None));
        assert!(!svc.reserve(id, 5, OrderId::new(), None, None));

        assert_eq!(svc.breaker().state(), CircuitState::Closed);
    }

    #[test]
    fn transient_conflict_is_retried_transparently() {
        let h = Harness::new();
        let svc = service(&h, 5);
        let id = h.seed(10, 0);

        h.store.conflict_next_appends(2);
        assert!(svc.reserve(id, 4, OrderId::new(), None, None));
        assert_eq!(h.load(id).reserved_quantity(), 4);
    }

    #[test]
    fn duplicate_correlation_id_replays_without_reserving_twice() {
        let h = Harness::new();
        let svc = service(&h, 5);
        let id = h.seed(100, 0);
        let order = OrderId::new();

        assert!(svc.reserve(id, 30, order, None, Some("checkout-7")));
        assert!(svc.reserve(id, 30, order, None, Some("checkout-7")));

        assert_eq!(h.load(id).reserved_quantity(), 30);
        assert_eq!(h.log.records().len(), 1);
    }
}
