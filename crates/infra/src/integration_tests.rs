//! End-to-end tests for the inventory engine.
//!
//! Engine → Repository → EventStore, with the recorder, broadcaster and
//! idempotency store observed from the outside.
//!
//! Verifies:
//! - The order lifecycle scenarios (reserve, refuse, allocate)
//! - Circuit breaker opening, fast-failing and recovering
//! - Concurrent reservations never oversell
//! - Conflict retry exhaustion and idempotent replay

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use stockguard_core::{AggregateRoot, OperationId, OrderId, ShipmentId};
    use stockguard_events::EventBus;
    use stockguard_inventory::{EventKind, InventoryId};

    use crate::broadcast::{BroadcastError, InventoryBroadcaster, InventoryUpdate};
    use crate::config::EngineConfig;
    use crate::engine::InventoryEngine;
    use crate::idempotency::{IdempotencyStore, InMemoryIdempotencyStore};
    use crate::recorder::{FailureReason, OperationOutcome};
    use crate::resilience::{CircuitBreakerConfig, CircuitState, RetryPolicy};
    use crate::services::test_support::Harness;

    fn config(threshold: u32) -> EngineConfig {
        EngineConfig::default()
            .with_breaker(
                CircuitBreakerConfig::default()
                    .with_failure_threshold(threshold)
                    .with_recovery_timeout(Duration::from_secs(30)),
            )
            .with_retry(RetryPolicy::immediate(3))
    }

    fn setup(threshold: u32) -> (Harness, InventoryEngine) {
        stockguard_observability::init_test();
        let h = Harness::new();
        let engine = InventoryEngine::new(h.ctx.clone(), &config(threshold));
        (h, engine)
    }

    fn stocked(engine: &InventoryEngine, on_hand: i64) -> InventoryId {
        let id = InventoryId::generate();
        assert!(engine.replenish(id, on_hand, "initial-count", None));
        id
    }

    #[test]
    fn scenario_a_second_reservation_exceeding_available_is_refused() {
        let (h, engine) = setup(5);
        let id = stocked(&engine, 100);

        assert!(engine.reserve(id, 30, OrderId::new(), None, None));
        assert_eq!(engine.snapshot(id).unwrap().reserved, 30);

        let before = engine.snapshot(id).unwrap();
        assert!(!engine.reserve(id, 80, OrderId::new(), None, None));
        assert_eq!(engine.snapshot(id).unwrap(), before);
        assert_eq!(before.available, 70);

        let refused = h.log.last().unwrap();
        assert_eq!(refused.outcome, OperationOutcome::Failure);
        assert_eq!(refused.reason, Some(FailureReason::InsufficientStock));
    }

    #[test]
    fn scenario_b_allocating_a_reservation_ships_it() {
        let (_h, engine) = setup(5);
        let id = stocked(&engine, 100);
        let order = OrderId::new();

        assert!(engine.reserve(id, 30, order, None, None));
        assert!(engine.allocate(id, 30, order, ShipmentId::new(), None));

        let snapshot = engine.snapshot(id).unwrap();
        assert_eq!(snapshot.on_hand, 70);
        assert_eq!(snapshot.reserved, 0);
    }

    #[test]
    fn scenario_c_open_breaker_fails_fast_without_touching_the_store() {
        let (h, engine) = setup(2);
        let id = stocked(&engine, 100);

        h.store.set_unavailable(true);
        assert!(!engine.reserve(id, 1, OrderId::new(), None, None));
        assert!(!engine.reserve(id, 1, OrderId::new(), None, None));
        assert_eq!(engine.reservation_breaker().state(), CircuitState::Open);

        let loads = h.store.loads();
        let appends = h.store.appends();
        assert!(!engine.reserve(id, 1, OrderId::new(), None, None));

        assert_eq!(h.store.loads(), loads);
        assert_eq!(h.store.appends(), appends);
        let record = h.log.last().unwrap();
        assert_eq!(record.outcome, OperationOutcome::CircuitOpen);
        assert_eq!(record.reason, Some(FailureReason::CircuitOpen));
    }

    #[test]
    fn scenario_d_breaker_recovers_through_a_successful_probe() {
        let (h, engine) = setup(2);
        let id = stocked(&engine, 100);

        h.store.set_unavailable(true);
        assert!(!engine.reserve(id, 1, OrderId::new(), None, None));
        assert!(!engine.reserve(id, 1, OrderId::new(), None, None));
        h.store.set_unavailable(false);

        h.clock.advance(Duration::from_secs(29));
        assert!(!engine.reserve(id, 1, OrderId::new(), None, None));
        assert_eq!(engine.reservation_breaker().state(), CircuitState::Open);

        h.clock.advance(Duration::from_secs(1));
        assert!(!engine.reserve(id, 1, OrderId::new(), None, None));
        assert_eq!(engine.reservation_breaker().state(), CircuitState::HalfOpen);

        assert!(engine.reserve(id, 1, OrderId::new(), None, None));
        assert_eq!(engine.reservation_breaker().state(), CircuitState::Closed);

        assert!(engine.reserve(id, 1, OrderId::new(), None, None));
        assert_eq!(engine.snapshot(id).unwrap().reserved, 2);
        assert_eq!(h.log.count_by_outcome(OperationOutcome::CircuitOpen), 2);
    }

    #[test]
    fn unreserved_services_ignore_an_open_breaker() {
        let (h, engine) = setup(1);
        let id = stocked(&engine, 10);

        h.store.fail_next_loads(1);
        assert!(!engine.reserve(id, 1, OrderId::new(), None, None));
        assert_eq!(engine.reservation_breaker().state(), CircuitState::Open);

        assert!(engine.replenish(id, 5, "po-2", None));
        assert_eq!(engine.snapshot(id).unwrap().on_hand, 15);
    }

    #[test]
    fn two_racing_reservations_cannot_oversell() {
        let (_h, engine) = setup(5);
        let id = stocked(&engine, 10);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = engine.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    engine.reserve(id, 6, OrderId::new(), None, None)
                })
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        let snapshot = engine.snapshot(id).unwrap();
        assert_eq!(snapshot.reserved, 6);
        assert_eq!(snapshot.available, 4);
    }

    #[test]
    fn many_racing_reservations_keep_the_invariant() {
        stockguard_observability::init_test();
        let h = Harness::new();
        let engine = InventoryEngine::new(
            h.ctx.clone(),
            &config(5).with_retry(RetryPolicy::immediate(64)),
        );
        let id = stocked(&engine, 5);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    engine.reserve(id, 1, OrderId::new(), None, None)
                })
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count() as i64;

        let snapshot = engine.snapshot(id).unwrap();
        assert_eq!(successes, 5);
        assert_eq!(snapshot.reserved, successes);
        assert!(snapshot.reserved <= snapshot.on_hand);
        assert_eq!(h.log.count_by_outcome(OperationOutcome::Success) as i64, successes + 1);
    }

    #[test]
    fn exhausted_conflict_retries_are_recorded_as_concurrency_conflict() {
        let (h, engine) = setup(5);
        let id = stocked(&engine, 10);

        h.store.conflict_next_appends(3);
        assert!(!engine.reserve(id, 2, OrderId::new(), None, Some("checkout-1")));

        let record = h.log.last().unwrap();
        assert_eq!(record.reason, Some(FailureReason::ConcurrencyConflict));
        assert!(record.detail.unwrap().contains('3'));
        assert_eq!(engine.snapshot(id).unwrap().reserved, 0);
        assert_eq!(engine.reservation_breaker().state(), CircuitState::Closed);

        assert!(engine.reserve(id, 2, OrderId::new(), None, Some("checkout-1")));
        assert_eq!(engine.snapshot(id).unwrap().reserved, 2);
    }

    #[test]
    fn replayed_correlation_id_does_not_mutate_twice() {
        let (h, engine) = setup(5);
        let id = stocked(&engine, 10);
        let order = OrderId::new();

        assert!(engine.reserve(id, 4, order, None, Some("req-42")));
        let version = engine.snapshot(id).unwrap().version;

        assert!(engine.reserve(id, 4, order, None, Some("req-42")));
        assert!(engine.reserve(id, 4, order, None, Some("  req-42  ")));

        let snapshot = engine.snapshot(id).unwrap();
        assert_eq!(snapshot.reserved, 4);
        assert_eq!(snapshot.version, version);
        let op = OperationId::parse("req-42").unwrap();
        assert_eq!(h.log.records_for(&op).len(), 1);
    }

    #[test]
    fn duplicate_while_in_flight_is_refused() {
        stockguard_observability::init_test();
        let h = Harness::new();
        let idempotency = Arc::new(InMemoryIdempotencyStore::new());
        let engine = InventoryEngine::new(
            h.ctx.clone().with_idempotency(idempotency.clone()),
            &config(5),
        );
        let id = stocked(&engine, 10);
        let op = OperationId::parse("req-7").unwrap();

        idempotency.begin(&op).unwrap();
        assert!(!engine.reserve(id, 1, OrderId::new(), None, Some("req-7")));
        assert_eq!(h.log.last().unwrap().reason, Some(FailureReason::DuplicateInFlight));

        idempotency.abandon(&op).unwrap();
        assert!(engine.reserve(id, 1, OrderId::new(), None, Some("req-7")));
    }

    #[test]
    fn reused_id_for_a_different_operation_is_refused() {
        let (h, engine) = setup(5);
        let id = stocked(&engine, 10);

        assert!(engine.reserve(id, 3, OrderId::new(), None, Some("req-9")));
        assert!(!engine.release(id, 3, OrderId::new(), Some("req-9")));

        assert_eq!(engine.snapshot(id).unwrap().reserved, 3);
        assert_eq!(h.log.last().unwrap().reason, Some(FailureReason::Exception));
    }

    #[test]
    fn reused_id_with_different_amount_or_order_is_refused() {
        let (h, engine) = setup(5);
        let id = stocked(&engine, 100);
        let order = OrderId::new();

        assert!(engine.reserve(id, 4, order, None, Some("req-1")));
        assert!(!engine.reserve(id, 90, order, None, Some("req-1")));
        assert!(!engine.reserve(id, 4, OrderId::new(), None, Some("req-1")));

        assert_eq!(engine.snapshot(id).unwrap().reserved, 4);
        let op = OperationId::parse("req-1").unwrap();
        let records = h.log.records_for(&op);
        assert_eq!(records.len(), 3);
        assert!(records[1..]
            .iter()
            .all(|r| r.reason == Some(FailureReason::Exception)));
        assert!(records[1].detail.as_deref().unwrap().contains("already used"));

        assert!(engine.reserve(id, 4, order, None, Some("req-1")));
        assert_eq!(engine.snapshot(id).unwrap().reserved, 4);
    }

    #[test]
    fn failed_operation_releases_its_claim() {
        let (h, engine) = setup(5);
        let id = stocked(&engine, 10);
        let order = OrderId::new();
        assert!(engine.reserve(id, 2, order, None, None));

        h.store.fail_next_appends(1);
        assert!(!engine.allocate(id, 2, order, ShipmentId::new(), Some("ship-1")));
        assert_eq!(h.log.last().unwrap().reason, Some(FailureReason::Exception));
        assert_eq!(engine.snapshot(id).unwrap().reserved, 2);

        assert!(engine.allocate(id, 2, order, ShipmentId::new(), Some("ship-1")));
        assert_eq!(engine.snapshot(id).unwrap().on_hand, 8);
    }

    struct FailingBroadcaster;

    impl InventoryBroadcaster for FailingBroadcaster {
        fn broadcast_inventory_update(
            &self,
            _update: InventoryUpdate,
            _at: DateTime<Utc>,
        ) -> Result<(), BroadcastError> {
            Err(BroadcastError::Publish("socket closed".to_string()))
        }
    }

    #[test]
    fn broadcast_failure_does_not_fail_the_operation() {
        stockguard_observability::init_test();
        let h = Harness::new();
        let engine = InventoryEngine::new(
            h.ctx.clone().with_broadcaster(Arc::new(FailingBroadcaster)),
            &config(5),
        );
        let id = stocked(&engine, 10);

        assert!(engine.reserve(id, 2, OrderId::new(), None, None));
        assert_eq!(engine.snapshot(id).unwrap().reserved, 2);
    }

    #[test]
    fn recorder_failure_does_not_change_the_result() {
        let (h, engine) = setup(5);
        let id = stocked(&engine, 10);

        h.log.set_unavailable(true);
        assert!(engine.reserve(id, 2, OrderId::new(), None, None));
        assert!(!engine.reserve(id, 50, OrderId::new(), None, None));
        assert_eq!(engine.snapshot(id).unwrap().reserved, 2);
    }

    #[test]
    fn subscribers_see_each_committed_change_in_order() {
        let (h, engine) = setup(5);
        let subscription = h.bus.subscribe();
        let id = stocked(&engine, 10);
        let order = OrderId::new();

        assert!(engine.reserve(id, 4, order, None, None));
        assert!(!engine.reserve(id, 40, order, None, None));
        assert!(engine.release(id, 1, order, None));

        let updates: Vec<_> = subscription.drain();
        let kinds: Vec<_> = updates.iter().map(|e| e.payload().kind).collect();
        assert_eq!(kinds, vec![EventKind::Replenished, EventKind::Reserved, EventKind::Released]);

        let last = updates.last().unwrap();
        assert_eq!(last.sequence_number(), 3);
        assert_eq!(last.payload().reserved, 3);
        assert_eq!(last.payload().available, 7);
    }

    #[test]
    fn rehydrated_state_matches_the_event_stream() {
        let (h, engine) = setup(5);
        let id = stocked(&engine, 50);
        let order = OrderId::new();

        assert!(engine.reserve(id, 20, order, None, None));
        assert!(engine.allocate(id, 15, order, ShipmentId::new(), None));
        assert!(engine.release(id, 100, order, None));
        assert!(engine.replenish(id, 5, "return-3", None));

        let aggregate = h.load(id);
        assert_eq!(aggregate.version(), 5);
        assert_eq!(aggregate.on_hand_quantity(), 40);
        assert_eq!(aggregate.reserved_quantity(), 0);
        assert!(aggregate.uncommitted_events().is_empty());
    }
}
