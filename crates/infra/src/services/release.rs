//! Give reserved stock back to available stock.
//!
//! Also the entry point an external expiry sweeper calls for stale holds.

use stockguard_core::OrderId;
use stockguard_inventory::{InventoryCommand, InventoryId, ReleaseStock};

use super::ServiceContext;
use super::pipeline::Outcome;
use crate::recorder::OperationKind;

#[derive(Debug, Clone)]
pub struct InventoryReleaseService {
    ctx: ServiceContext,
}

impl InventoryReleaseService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Release up to `amount` reserved units.
    ///
    /// The amount is clamped to what is reserved at the time of the write, so
    /// releasing more than is held releases everything. The success record
    /// carries the clamped amount.
    pub fn release(
        &self,
        inventory_id: InventoryId,
        amount: i64,
        order_id: OrderId,
        correlation_id: Option<&str>,
    ) -> bool {
        let op = self
            .ctx
            .resolve(inventory_id, OperationKind::Release, amount, order_id.to_string(), correlation_id);
        if let Some(result) = self.ctx.gate(&op) {
            return result;
        }

        let occurred_at = op.meta.occurred_at;
        let outcome = match self.ctx.mutate(&op.meta, |_| {
            Ok(InventoryCommand::Release(ReleaseStock {
                amount,
                order_id,
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
    fn release_clamps_to_reserved_and_records_actual_amount() {
        let h = Harness::new();
        let svc = InventoryReleaseService::new(h.ctx.clone());
        let id = h.seed(100, 20);

        assert!(svc.release(id, 1_000, OrderId::new(), None));

        let aggregate = h.load(id);
        assert_eq!(aggregate.reserved_quantity(), 0);
        assert_eq!(aggregate.on_hand_quantity(), 100);
        let record = h.log.last().unwrap();
        assert_eq!(record.outcome, OperationOutcome::Success);
        assert_eq!(record.amount, 20);
    }

    #[test]
    fn release_with_nothing_reserved_is_a_recorded_no_op() {
        let h = Harness::new();
        let svc = InventoryReleaseService::new(h.ctx.clone());
        let id = h.seed(100, 0);

        assert!(!svc.release(id, 5, OrderId::new(), None));
        assert_eq!(h.log.last().unwrap().reason, Some(FailureReason::NothingReserved));
    }

    #[test]
    fn negative_release_is_rejected() {
        let h = Harness::new();
        let svc = InventoryReleaseService::new(h.ctx.clone());
        let id = h.seed(100, 10);

        assert!(!svc.release(id, -3, OrderId::new(), None));
        assert_eq!(h.load(id).reserved_quantity(), 10);
        assert_eq!(h.log.last().unwrap().reason, Some(FailureReason::InvalidAmount));
    }

    #[test]
    fn release_after_conflict_clamps_against_fresh_state() {
        let h = Harness::new();
        let svc = InventoryReleaseService::new(h.ctx.clone());
        let id = h.seed(100, 8);

        h.store.conflict_next_appends(1);
        assert!(svc.release(id, 10, OrderId::new(), None));

        assert_eq!(h.load(id).reserved_quantity(), 0);
        assert_eq!(h.log.last().unwrap().amount, 8);
    }
}
