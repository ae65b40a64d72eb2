//! Convert reserved stock into a shipment.

use stockguard_core::{OrderId, ShipmentId};
use stockguard_inventory::{AllocateStock, InventoryCommand, InventoryId};

use super::ServiceContext;
use super::pipeline::Outcome;
use crate::recorder::OperationKind;

#[derive(Debug, Clone)]
pub struct InventoryAllocationService {
    ctx: ServiceContext,
}

impl InventoryAllocationService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Ship `amount` reserved units. Fails closed if fewer are reserved.
    pub fn allocate(
        &self,
        inventory_id: InventoryId,
        amount: i64,
        order_id: OrderId,
        shipment_id: ShipmentId,
        correlation_id: Option<&str>,
    ) -> bool {
        let op = self.ctx.resolve(
            inventory_id,
            OperationKind::Allocate,
            amount,
            format!("{order_id}/{shipment_id}"),
            correlation_id,
        );
        if let Some(result) = self.ctx.gate(&op) {
            return result;
        }

        let occurred_at = op.meta.occurred_at;
        let outcome = match self.ctx.mutate(&op.meta, |_| {
            Ok(InventoryCommand::Allocate(AllocateStock {
                amount,
                order_id,
                shipment_id,
                occurred_at,
            }))
        }) {
            Ok(mutation) => Outcome::Mutation(mutation),
            Err(e) => Outcome::Backend(e),
        };

        self.ctx.finish(&op, outcome).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{FailureReason, OperationOutcome};
    use crate::services::test_support::Harness;

    #[test]
    fn allocating_reserved_stock_ships_it() {
        let h = Harness::new();
        let svc = InventoryAllocationService::new(h.ctx.clone());
        let id = h.seed(100, 30);

        assert!(svc.allocate(id, 30, OrderId::new(), ShipmentId::new(), None));

        let aggregate = h.load(id);
        assert_eq!(aggregate.on_hand_quantity(), 70);
        assert_eq!(aggregate.reserved_quantity(), 0);
        assert_eq!(h.log.last().unwrap().outcome, OperationOutcome::Success);
    }

    #[test]
    fn allocating_more_than_reserved_fails_closed() {
        let h = Harness::new();
        let svc = InventoryAllocationService::new(h.ctx.clone());
        let id = h.seed(100, 10);

        assert!(!svc.allocate(id, 11, OrderId::new(), ShipmentId::new(), None));

        let aggregate = h.load(id);
        assert_eq!(aggregate.on_hand_quantity(), 100);
        assert_eq!(aggregate.reserved_quantity(), 10);
        assert_eq!(h.log.last().unwrap().reason, Some(FailureReason::InsufficientStock));
    }

    #[test]
    fn store_outage_is_recorded_as_exception() {
        let h = Harness::new();
        let svc = InventoryAllocationService::new(h.ctx.clone());
        let id = h.seed(10, 5);

        h.store.fail_next_appends(1);
        assert!(!svc.allocate(id, 5, OrderId::new(), ShipmentId::new(), None));

        assert_eq!(h.log.last().unwrap().reason, Some(FailureReason::Exception));
        assert_eq!(h.load(id).reserved_quantity(), 5);
    }

    #[test]
    fn exhausted_conflicts_are_recorded() {
        let h = Harness::new();
        let svc = InventoryAllocationService::new(h.ctx.clone());
        let id = h.seed(10, 5);

        h.store.conflict_next_appends(3);
        assert!(!svc.allocate(id, 5, OrderId::new(), ShipmentId::new(), None));

        let record = h.log.last().unwrap();
        assert_eq!(record.reason, Some(FailureReason::ConcurrencyConflict));
        assert_eq!(h.store.appends(), 1 + 3);
    }
}
