use chrono::Utc;
use riverwatch_common::types::{
    ActivateTriggerRequest, CreateTriggerRequest, DataSource, EngineEvent, UpdateTriggerRequest,
};
use riverwatch_storage::{TriggerRow, TriggerStore, TriggerUpdate};
use std::sync::Arc;
use tokio::time::Duration;

use crate::coordinator::PhaseActivationCoordinator;
use crate::error::{EngineError, Result};
use crate::events::EventBus;
use crate::locks::TriggerLocks;
use crate::scheduler::{IntervalJobQueue, TickPayload};
use crate::AdapterRegistry;

/// Trigger lifecycle: creation (with scheduling registration), manual
/// activation, guarded removal, and archival.
pub struct TriggerEngine {
    store: Arc<TriggerStore>,
    coordinator: Arc<PhaseActivationCoordinator>,
    registry: Arc<AdapterRegistry>,
    queue: Arc<IntervalJobQueue>,
    locks: Arc<TriggerLocks>,
    events: Arc<EventBus>,
    check_interval: Duration,
}

impl TriggerEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<TriggerStore>,
        coordinator: Arc<PhaseActivationCoordinator>,
        registry: Arc<AdapterRegistry>,
        queue: Arc<IntervalJobQueue>,
        locks: Arc<TriggerLocks>,
        events: Arc<EventBus>,
        check_interval: Duration,
    ) -> Self {
        Self {
            store,
            coordinator,
            registry,
            queue,
            locks,
            events,
            check_interval,
        }
    }

    /// Data sources with a registered adapter.
    pub fn registered_sources(&self) -> Vec<DataSource> {
        self.registry.registered_sources()
    }

    /// Number of recurring check jobs currently scheduled.
    pub fn active_jobs(&self) -> usize {
        self.queue.active_jobs()
    }

    /// Create a trigger. MANUAL statements persist directly; automated
    /// sources persist the trigger under a pre-assigned repeat key and
    /// only then register its recurring check, so the job's immediate
    /// first tick always finds the row.
    pub async fn create(&self, req: &CreateTriggerRequest) -> Result<TriggerRow> {
        let Some(phase) = self.store.get_phase_by_id(&req.phase_id).await? else {
            return Err(EngineError::not_found("phase", &req.phase_id));
        };

        let data_source = req.statement.data_source();
        if data_source != DataSource::Manual && self.registry.get(data_source).is_none() {
            return Err(EngineError::invalid(format!(
                "no adapter registered for data source {data_source}"
            )));
        }

        let statement_json = serde_json::to_string(&req.statement)
            .map_err(|e| EngineError::invalid(format!("unserializable statement: {e}")))?;

        let id = riverwatch_common::id::next_id();
        let repeat_key = if data_source == DataSource::Manual {
            None
        } else {
            Some(riverwatch_common::id::next_id())
        };

        let now = Utc::now();
        let row = TriggerRow {
            id: id.clone(),
            phase_id: phase.id.clone(),
            title: req.title.clone(),
            data_source: data_source.to_string(),
            statement_json,
            is_mandatory: req.is_mandatory,
            is_triggered: false,
            triggered_at: None,
            triggered_by: None,
            repeat_key: repeat_key.clone(),
            transaction_hash: None,
            notes: req.notes.clone(),
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        let created = self.store.insert_trigger(&row).await?;

        if let Some(key) = repeat_key {
            self.queue.register(
                key,
                TickPayload {
                    trigger_id: id,
                    phase_id: phase.id.clone(),
                    river_basin: phase.river_basin.clone(),
                    data_source,
                },
                self.check_interval,
            );
        }

        tracing::info!(
            trigger_id = %created.id,
            phase_id = %created.phase_id,
            data_source = %created.data_source,
            "Trigger created"
        );
        Ok(created)
    }

    /// Best-effort bulk creation: one failing item does not block its
    /// siblings. The result vector is positionally aligned with the
    /// input.
    pub async fn bulk_create(
        &self,
        reqs: &[CreateTriggerRequest],
    ) -> Vec<Result<TriggerRow>> {
        let mut results = Vec::with_capacity(reqs.len());
        for req in reqs {
            let result = self.create(req).await;
            if let Err(e) = &result {
                tracing::warn!(
                    phase_id = %req.phase_id,
                    title = %req.title,
                    error = %e,
                    "Bulk create item failed"
                );
            }
            results.push(result);
        }
        results
    }

    pub async fn get_all(
        &self,
        phase_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TriggerRow>> {
        Ok(self.store.list_triggers(phase_id, false, limit, offset).await?)
    }

    pub async fn get_one(&self, id: &str) -> Result<TriggerRow> {
        match self.store.get_trigger_by_id(id).await? {
            Some(t) if !t.is_deleted => Ok(t),
            _ => Err(EngineError::not_found("trigger", id)),
        }
    }

    /// Update an untriggered trigger's title, statement, or notes.
    /// Triggered records are immutable until revert.
    pub async fn update(&self, id: &str, req: &UpdateTriggerRequest) -> Result<TriggerRow> {
        let _guard = self.locks.acquire(id).await;

        let trigger = self.get_one(id).await?;
        if trigger.is_triggered {
            return Err(EngineError::conflict(
                "trigger is already triggered and immutable until revert",
            ));
        }

        let statement_json = match &req.statement {
            Some(statement) => {
                if statement.data_source().to_string() != trigger.data_source {
                    return Err(EngineError::invalid(format!(
                        "statement source {} does not match trigger source {}",
                        statement.data_source(),
                        trigger.data_source
                    )));
                }
                Some(serde_json::to_string(statement).map_err(|e| {
                    EngineError::invalid(format!("unserializable statement: {e}"))
                })?)
            }
            None => None,
        };

        let update = TriggerUpdate {
            title: req.title.clone(),
            statement_json,
            notes: req.notes.clone(),
        };
        self.store
            .update_trigger_fields(id, &update)
            .await?
            .ok_or_else(|| EngineError::not_found("trigger", id))
    }

    /// Remove an automated trigger by its repeat key. Refused when the
    /// trigger already fired, the phase is active, or dropping an
    /// optional trigger would leave fewer live optional triggers than
    /// the phase requires. Removing a mandatory trigger lowers the
    /// phase's required-mandatory bar so activation stays reachable.
    pub async fn remove(&self, repeat_key: &str) -> Result<()> {
        let Some(trigger) = self.store.get_trigger_by_repeat_key(repeat_key).await? else {
            return Err(EngineError::not_found("trigger", repeat_key));
        };
        if trigger.is_deleted {
            return Err(EngineError::not_found("trigger", repeat_key));
        }

        let _guard = self.locks.acquire(&trigger.id).await;

        if trigger.is_triggered {
            return Err(EngineError::conflict(
                "trigger is already triggered and cannot be removed",
            ));
        }
        let Some(phase) = self.store.get_phase_by_id(&trigger.phase_id).await? else {
            return Err(EngineError::not_found("phase", &trigger.phase_id));
        };
        if phase.is_active {
            return Err(EngineError::conflict(
                "owning phase is active; revert it before removing triggers",
            ));
        }
        if !trigger.is_mandatory {
            let live = self
                .store
                .count_live_optional_triggers(&trigger.phase_id)
                .await?;
            if live.saturating_sub(1) < phase.required_optional_triggers as u64 {
                return Err(EngineError::conflict(
                    "removal would leave fewer optional triggers than the phase requires",
                ));
            }
        }

        self.queue.cancel(repeat_key);
        self.store.soft_delete_trigger(&trigger.id).await?;
        if trigger.is_mandatory {
            self.store
                .decrement_required_mandatory(&trigger.phase_id)
                .await?;
        }
        drop(_guard);
        self.locks.forget(&trigger.id);

        tracing::info!(
            trigger_id = %trigger.id,
            phase_id = %trigger.phase_id,
            "Trigger removed"
        );
        Ok(())
    }

    /// Manually activate a MANUAL-source trigger. Runs under the same
    /// per-trigger lock as scheduled checks, so a racing tick or a
    /// repeated activation observes the triggered state and conflicts.
    pub async fn activate_manual(
        &self,
        id: &str,
        req: &ActivateTriggerRequest,
        actor: &str,
    ) -> Result<TriggerRow> {
        let guard = self.locks.acquire(id).await;

        let trigger = self.get_one(id).await?;
        let data_source: DataSource = trigger
            .data_source
            .parse()
            .map_err(EngineError::InvalidArgument)?;
        if data_source != DataSource::Manual {
            return Err(EngineError::conflict(
                "only MANUAL triggers can be activated manually",
            ));
        }
        if trigger.is_triggered {
            drop(guard);
            self.locks.forget(id);
            return Err(EngineError::conflict("trigger is already triggered"));
        }

        let now = Utc::now();
        let by = req.activated_by.as_deref().unwrap_or(actor);
        // Mark and counter credit commit together; `false` means a
        // racing consume won after our reload.
        if !self.coordinator.complete_trigger(&trigger, now, by).await? {
            drop(guard);
            self.locks.forget(id);
            return Err(EngineError::conflict("trigger is already triggered"));
        }
        if let Some(notes) = &req.notes {
            self.store
                .update_trigger_fields(
                    &trigger.id,
                    &TriggerUpdate {
                        notes: Some(notes.clone()),
                        ..TriggerUpdate::default()
                    },
                )
                .await?;
        }

        tracing::info!(trigger_id = %trigger.id, phase_id = %trigger.phase_id, triggered_by = by, "Trigger manually activated");
        self.events.publish(EngineEvent::TriggerActivated {
            trigger_id: trigger.id.clone(),
            phase_id: trigger.phase_id.clone(),
            data_source,
            triggered_by: by.to_string(),
            triggered_at: now,
        });

        let activated = self.get_one(id).await?;
        drop(guard);
        self.locks.forget(id);
        Ok(activated)
    }

    /// Attach an external transaction reference to a trigger.
    pub async fn update_transaction(&self, id: &str, tx_hash: &str) -> Result<()> {
        if self.store.set_transaction_hash(id, tx_hash).await? {
            Ok(())
        } else {
            Err(EngineError::not_found("trigger", id))
        }
    }

    /// End-of-cycle cleanup: unschedule and soft-delete every live
    /// trigger of a phase, triggered or not. Returns the number of
    /// archived triggers.
    pub async fn archive(&self, phase_id: &str) -> Result<usize> {
        if self.store.get_phase_by_id(phase_id).await?.is_none() {
            return Err(EngineError::not_found("phase", phase_id));
        }

        let triggers = self.store.list_live_triggers_of_phase(phase_id).await?;
        let mut archived = 0usize;
        for trigger in &triggers {
            if let Some(key) = &trigger.repeat_key {
                self.queue.cancel(key);
            }
            if self.store.soft_delete_trigger(&trigger.id).await? {
                archived += 1;
            }
            self.locks.forget(&trigger.id);
        }

        tracing::info!(phase_id, archived, "Phase triggers archived");
        Ok(archived)
    }
}
