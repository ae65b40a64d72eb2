//! Add incoming supply to on-hand stock.
//!
//! Besides the operation record, every successful replenishment emits a
//! supply-chain event to the recorder.

use serde_json::json;
use tracing::warn;

use stockguard_inventory::{InventoryCommand, InventoryId, ReplenishStock};

use super::ServiceContext;
use super::pipeline::Outcome;
use crate::recorder::{OperationKind, SupplyChainEvent};

pub const STOCK_REPLENISHED: &str = "stock_replenished";

#[derive(Debug, Clone)]
pub struct InventoryReplenishmentService {
    ctx: ServiceContext,
}

impl InventoryReplenishmentService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Add `amount` units received from `source` (purchase order, return, ...).
    pub fn replenish(
        &self,
        inventory_id: InventoryId,
        amount: i64,
        source: &str,
        correlation_id: Option<&str>,
    ) -> bool {
        let op = self
            .ctx
            .resolve(inventory_id, OperationKind::Replenish, amount, source.to_string(), correlation_id);
        if let Some(result) = self.ctx.gate(&op) {
            return result;
        }

        let occurred_at = op.meta.occurred_at;
        let outcome = match self.ctx.mutate(&op.meta, |_| {
            Ok(InventoryCommand::Replenish(ReplenishStock {
                amount,
                source: source.to_string(),
                occurred_at,
            }))
        }) {
            Ok(mutation) => Outcome::Mutation(mutation),
            Err(e) => Outcome::Backend(e),
        };

        let Some(committed) = self.ctx.finish(&op, outcome) else {
            return false;
        };

        let event = SupplyChainEvent {
            operation_id: op.meta.operation_id.clone(),
            inventory_id,
            kind: STOCK_REPLENISHED.to_string(),
            amount,
            source: source.to_string(),
            metadata: json!({
                "on_hand_after": committed.snapshot.on_hand,
                "available_after": committed.snapshot.available,
                "version": committed.snapshot.version,
                "attempts": committed.attempts,
            }),
            recorded_at: occurred_at,
        };
        if let Err(e) = self.ctx.recorder.record_supply_chain_event(event) {
            warn!(
                operation_id = %op.meta.operation_id,
                inventory_id = %inventory_id,
                error = %e,
                "failed to record supply chain event"
            );
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::FailureReason;
    use crate::services::test_support::Harness;
    use stockguard_events::EventBus;

    #[test]
    fn replenish_adds_stock_and_emits_supply_chain_event() {
        let h = Harness::new();
        let svc = InventoryReplenishmentService::new(h.ctx.clone());
        let id = h.seed(10, 0);

        assert!(svc.replenish(id, 40, "po-1001", Some("receipt-9")));

        assert_eq!(h.load(id).on_hand_quantity(), 50);
        let events = h.log.supply_chain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, STOCK_REPLENISHED);
        assert_eq!(events[0].source, "po-1001");
        assert_eq!(events[0].operation_id.as_str(), "receipt-9");
        assert_eq!(events[0].metadata["on_hand_after"], 50);
    }

    #[test]
    fn replenishing_a_new_record_creates_it() {
        let h = Harness::new();
        let svc = InventoryReplenishmentService::new(h.ctx.clone());
        let id = InventoryId::generate();

        assert!(svc.replenish(id, 5, "cycle-count", None));
        assert_eq!(h.load(id).on_hand_quantity(), 5);
    }

    #[test]
    fn non_positive_amount_emits_nothing() {
        let h = Harness::new();
        let svc = InventoryReplenishmentService::new(h.ctx.clone());
        let id = h.seed(10, 0);
        let subscription = h.bus.subscribe();

        assert!(!svc.replenish(id, 0, "po-1", None));

        assert!(h.log.supply_chain_events().is_empty());
        assert!(subscription.drain().is_empty());
        assert_eq!(h.log.last().unwrap().reason, Some(FailureReason::InvalidAmount));
    }

    #[test]
    fn recorder_outage_does_not_fail_the_replenishment() {
        let h = Harness::new();
        let svc = InventoryReplenishmentService::new(h.ctx.clone());
        let id = h.seed(10, 0);

        h.log.set_unavailable(true);
        assert!(svc.replenish(id, 5, "po-2", None));
        assert_eq!(h.load(id).on_hand_quantity(), 15);
    }
}
