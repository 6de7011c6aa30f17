use chrono::{DateTime, Utc};
use riverwatch_common::types::EngineEvent;
use riverwatch_storage::{RevertOutcome, TriggerRow, TriggerStore};
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::events::EventBus;
use crate::locks::TriggerLocks;

/// Owns the phase state transitions: the transactional trigger consume,
/// the exactly-once activation edge, and the versioned revert.
pub struct PhaseActivationCoordinator {
    store: Arc<TriggerStore>,
    events: Arc<EventBus>,
    locks: Arc<TriggerLocks>,
}

impl PhaseActivationCoordinator {
    pub fn new(
        store: Arc<TriggerStore>,
        events: Arc<EventBus>,
        locks: Arc<TriggerLocks>,
    ) -> Self {
        Self {
            store,
            events,
            locks,
        }
    }

    /// Consume a trigger: the conditional mark and the counter credit
    /// commit as one transaction, then the activation condition is
    /// evaluated. Returns `false` when the trigger was already consumed
    /// (the mark's single-shot filter matched nothing), in which case
    /// the counter is untouched.
    pub async fn complete_trigger(
        &self,
        trigger: &TriggerRow,
        at: DateTime<Utc>,
        by: &str,
    ) -> Result<bool> {
        let marked = self
            .store
            .complete_trigger(&trigger.id, &trigger.phase_id, trigger.is_mandatory, at, by)
            .await?;
        if !marked {
            return Ok(false);
        }
        tracing::debug!(
            trigger_id = %trigger.id,
            phase_id = %trigger.phase_id,
            is_mandatory = trigger.is_mandatory,
            "Trigger consumed and recorded against phase"
        );
        self.evaluate_activation(&trigger.phase_id).await?;
        Ok(true)
    }

    /// Evaluate the activation condition as a single conditional
    /// UPDATE. The store reports `true` exactly once per activation,
    /// which is when the event is published.
    pub async fn evaluate_activation(&self, phase_id: &str) -> Result<()> {
        let now = Utc::now();
        if self.store.try_activate_phase(phase_id, now).await? {
            tracing::info!(phase_id, "Phase activated");
            self.events.publish(EngineEvent::PhaseActivated {
                phase_id: phase_id.to_string(),
                activated_at: now,
            });
        }
        Ok(())
    }

    /// Administrative rollback of an activated phase. The snapshot,
    /// trigger resets, and phase reset commit as one transaction; the
    /// preconditions are re-checked inside it, so a concurrent state
    /// change surfaces as a conflict with nothing written.
    pub async fn revert(&self, phase_id: &str, actor: &str) -> Result<RevertOutcome> {
        let Some(phase) = self.store.get_phase_by_id(phase_id).await? else {
            return Err(EngineError::not_found("phase", phase_id));
        };
        if !phase.is_active {
            return Err(EngineError::conflict("phase is not active"));
        }
        if !phase.can_revert {
            return Err(EngineError::conflict("phase does not allow revert"));
        }

        // Take every live trigger's lock so no in-flight check straddles
        // the revert: a tick holds its trigger's lock across its whole
        // reload → check → consume sequence.
        let live = self.store.list_live_triggers_of_phase(phase_id).await?;
        let mut guards = Vec::with_capacity(live.len());
        for trigger in &live {
            guards.push(self.locks.acquire(&trigger.id).await);
        }

        let now = Utc::now();
        match self.store.revert_phase(phase_id, actor, now).await? {
            Some(outcome) => {
                tracing::info!(
                    phase_id,
                    version = outcome.version,
                    reverted_triggers = outcome.reverted_triggers,
                    reverted_by = actor,
                    "Phase reverted"
                );
                self.events.publish(EngineEvent::PhaseReverted {
                    phase_id: phase_id.to_string(),
                    version: outcome.version,
                    reverted_by: actor.to_string(),
                    reverted_at: outcome.reverted_at,
                });
                Ok(outcome)
            }
            None => Err(EngineError::conflict(
                "phase is no longer active or revertible",
            )),
        }
    }
}
