use tracing::{debug, error, info, warn};

use stockguard_core::OperationId;
use stockguard_inventory::{
    InventoryAggregate, InventoryCommand, InventoryEvent, InventoryId, InventorySnapshot,
    StockError,
};

use super::ServiceContext;
use crate::broadcast::InventoryUpdate;
use crate::idempotency::{CompletedOperation, IdempotencyClaim};
use crate::recorder::{FailureReason, OperationKind, OperationMeta};
use crate::repository::RepositoryError;
use crate::resilience::{Attempt, RetryOutcome};

/// A change that made it into the store.
#[derive(Debug, Clone)]
pub(crate) struct Committed {
    pub event: InventoryEvent,
    pub snapshot: InventorySnapshot,
    pub attempts: u32,
}

/// How the retried load → execute → persist loop ended, short of a backend error.
#[derive(Debug)]
pub(crate) enum Mutation {
    Committed(Committed),
    Refused(StockError),
    Conflicted { attempts: u32 },
}

#[derive(Debug)]
pub(crate) enum Outcome {
    Mutation(Mutation),
    Backend(RepositoryError),
    CircuitRejected(String),
}

/// An operation id plus whether the caller chose it.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedOperation {
    pub meta: OperationMeta,
    /// Order, shipment or source the call is for; part of the replay key.
    pub reference: String,
    pub caller_supplied: bool,
}

impl ServiceContext {
    pub(crate) fn resolve(
        &self,
        inventory_id: InventoryId,
        kind: OperationKind,
        amount: i64,
        reference: String,
        correlation_id: Option<&str>,
    ) -> ResolvedOperation {
        let supplied = correlation_id.and_then(|raw| OperationId::parse(raw).ok());
        let caller_supplied = supplied.is_some();
        let operation_id = supplied.unwrap_or_else(OperationId::generate);

        ResolvedOperation {
            meta: OperationMeta {
                operation_id,
                inventory_id,
                kind,
                amount,
                occurred_at: self.clock.now(),
            },
            reference,
            caller_supplied,
        }
    }

    /// Check the dedup table. `Some(result)` short-circuits the call.
    pub(crate) fn gate(&self, op: &ResolvedOperation) -> Option<bool> {
        if !op.caller_supplied {
            return None;
        }
        let meta = &op.meta;

        match self.idempotency.begin(&meta.operation_id) {
            Ok(IdempotencyClaim::Fresh) => None,
            Ok(IdempotencyClaim::Completed(done))
                if done.is_same_request(meta.inventory_id, meta.kind, meta.amount, &op.reference) =>
            {
                info!(
                    operation_id = %meta.operation_id,
                    inventory_id = %meta.inventory_id,
                    kind = %meta.kind,
                    amount = done.amount,
                    "replaying completed operation"
                );
                Some(true)
            }
            Ok(IdempotencyClaim::Completed(done)) => {
                let detail = format!(
                    "operation id already used for {} of {} on {} ({})",
                    done.kind, done.requested, done.inventory_id, done.reference
                );
                self.record_failure(meta, FailureReason::Exception, Some(&detail));
                Some(false)
            }
            Ok(IdempotencyClaim::InFlight) => {
                self.record_failure(
                    meta,
                    FailureReason::DuplicateInFlight,
                    Some("an operation with this id is still running"),
                );
                Some(false)
            }
            Err(e) => {
                self.record_failure(meta, FailureReason::Exception, Some(&e.to_string()));
                Some(false)
            }
        }
    }

    /// Load, decide, execute and persist under the retry policy.
    ///
    /// `build` turns the freshly loaded state into a command; it runs again on
    /// every attempt. Only backend failures come back as `Err`.
    pub(crate) fn mutate<F>(
        &self,
        meta: &OperationMeta,
        mut build: F,
    ) -> Result<Mutation, RepositoryError>
    where
        F: FnMut(&InventoryAggregate) -> Result<InventoryCommand, StockError>,
    {
        let outcome = self.retry.run(|attempt| {
            let mut aggregate = self.repository.load_or_create(meta.inventory_id)?;

            let event = match build(&aggregate).and_then(|cmd| aggregate.execute(&cmd)) {
                Ok(event) => event,
                Err(refusal) => return Ok(Attempt::Done(Err(refusal))),
            };

            match self.repository.apply_events(&mut aggregate) {
                Ok(_) => Ok(Attempt::Done(Ok(Committed {
                    event,
                    snapshot: aggregate.snapshot(),
                    attempts: attempt,
                }))),
                Err(e) if e.is_conflict() => {
                    warn!(
                        operation_id = %meta.operation_id,
                        inventory_id = %meta.inventory_id,
                        attempt,
                        error = %e,
                        "version conflict while persisting inventory change"
                    );
                    Ok(Attempt::Conflict)
                }
                Err(e) => Err(e),
            }
        })?;

        Ok(match outcome {
            RetryOutcome::Ok { value: Ok(c), .. } => Mutation::Committed(c),
            RetryOutcome::Ok { value: Err(e), .. } => Mutation::Refused(e),
            RetryOutcome::Conflict => Mutation::Conflicted { attempts: 1 },
            RetryOutcome::ExhaustedRetries { attempts } => Mutation::Conflicted { attempts },
        })
    }

    /// Record, broadcast and settle the idempotency claim.
    pub(crate) fn finish(&self, op: &ResolvedOperation, outcome: Outcome) -> Option<Committed> {
        let meta = &op.meta;

        let committed = match outcome {
            Outcome::Mutation(Mutation::Committed(committed)) => committed,
            Outcome::Mutation(Mutation::Refused(refusal)) => {
                info!(
                    operation_id = %meta.operation_id,
                    inventory_id = %meta.inventory_id,
                    kind = %meta.kind,
                    amount = meta.amount,
                    reason = refusal.reason(),
                    "inventory operation refused"
                );
                self.fail(op, FailureReason::from(&refusal), Some(&refusal.to_string()));
                return None;
            }
            Outcome::Mutation(Mutation::Conflicted { attempts }) => {
                warn!(
                    operation_id = %meta.operation_id,
                    inventory_id = %meta.inventory_id,
                    kind = %meta.kind,
                    attempts,
                    reason = FailureReason::ConcurrencyConflict.as_str(),
                    "inventory operation gave up after repeated version conflicts"
                );
                let detail = format!("version conflict on all {attempts} attempt(s)");
                self.fail(op, FailureReason::ConcurrencyConflict, Some(&detail));
                return None;
            }
            Outcome::Backend(e) => {
                error!(
                    operation_id = %meta.operation_id,
                    inventory_id = %meta.inventory_id,
                    kind = %meta.kind,
                    error = %e,
                    reason = FailureReason::Exception.as_str(),
                    "inventory operation failed"
                );
                self.fail(op, FailureReason::Exception, Some(&e.to_string()));
                return None;
            }
            Outcome::CircuitRejected(message) => {
                warn!(
                    operation_id = %meta.operation_id,
                    inventory_id = %meta.inventory_id,
                    kind = %meta.kind,
                    reason = FailureReason::CircuitOpen.as_str(),
                    "{}",
                    message
                );
                if let Err(e) = self.recorder.record_circuit_breaker_failure(meta, &message) {
                    warn!(operation_id = %meta.operation_id, error = %e, "failed to record circuit breaker failure");
                }
                self.abandon(op);
                return None;
            }
        };

        let moved = committed.event.amount();
        info!(
            operation_id = %meta.operation_id,
            inventory_id = %meta.inventory_id,
            kind = %meta.kind,
            amount = moved,
            attempt = committed.attempts,
            version = committed.snapshot.version,
            "inventory operation succeeded"
        );

        if let Err(e) = self.recorder.record_successful_operation(meta, moved) {
            warn!(operation_id = %meta.operation_id, error = %e, "failed to record successful operation");
        }

        let update = InventoryUpdate::new(committed.snapshot, committed.event.kind());
        if let Err(e) = self.broadcaster.broadcast_inventory_update(update, self.clock.now()) {
            warn!(operation_id = %meta.operation_id, inventory_id = %meta.inventory_id, error = %e, "inventory broadcast failed");
        }

        if op.caller_supplied {
            let done = CompletedOperation {
                inventory_id: meta.inventory_id,
                kind: meta.kind,
                requested: meta.amount,
                amount: moved,
                reference: op.reference.clone(),
                completed_at: self.clock.now(),
            };
            if let Err(e) = self.idempotency.complete(&meta.operation_id, done) {
                warn!(operation_id = %meta.operation_id, error = %e, "failed to mark operation completed");
            }
        }

        Some(committed)
    }

    fn fail(&self, op: &ResolvedOperation, reason: FailureReason, detail: Option<&str>) {
        self.record_failure(&op.meta, reason, detail);
        self.abandon(op);
    }

    fn record_failure(&self, meta: &OperationMeta, reason: FailureReason, detail: Option<&str>) {
        if let Err(e) = self.recorder.record_failed_operation(meta, reason, detail) {
            warn!(
                operation_id = %meta.operation_id,
                reason = reason.as_str(),
                error = %e,
                "failed to record failed operation"
            );
        }
    }

    fn abandon(&self, op: &ResolvedOperation) {
        if !op.caller_supplied {
            return;
        }
        if let Err(e) = self.idempotency.abandon(&op.meta.operation_id) {
            warn!(operation_id = %op.meta.operation_id, error = %e, "failed to release idempotency claim");
        } else {
            debug!(operation_id = %op.meta.operation_id, "idempotency claim released");
        }
    }
}
