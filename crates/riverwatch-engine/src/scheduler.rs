use chrono::Utc;
use dashmap::DashMap;
use riverwatch_common::types::{DataSource, EngineEvent, TriggerStatement};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::coordinator::PhaseActivationCoordinator;
use crate::error::{EngineError, Result};
use crate::events::EventBus;
use crate::locks::TriggerLocks;
use crate::{AdapterRegistry, DataSourceAdapter};
use riverwatch_storage::TriggerStore;

/// Scheduled unit of work: one recurring check for one trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickPayload {
    pub trigger_id: String,
    pub phase_id: String,
    pub river_basin: String,
    pub data_source: DataSource,
}

/// What a tick did. `Completed` tells the job loop to stop ticking:
/// the trigger is triggered (or gone) and future checks are pointless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Trigger is done (triggered, deleted, or missing); stop the job.
    Completed,
    /// Criterion not met yet, or the tick failed transiently; keep
    /// ticking.
    Pending,
    /// No adapter for the payload's data source; silent no-op.
    Skipped,
}

/// Routes ticks to the matching adapter and owns the shared
/// reload → check → act sequence under the per-trigger lock.
pub struct TickDispatcher {
    store: Arc<TriggerStore>,
    coordinator: Arc<PhaseActivationCoordinator>,
    registry: Arc<AdapterRegistry>,
    locks: Arc<TriggerLocks>,
    events: Arc<EventBus>,
}

impl TickDispatcher {
    pub fn new(
        store: Arc<TriggerStore>,
        coordinator: Arc<PhaseActivationCoordinator>,
        registry: Arc<AdapterRegistry>,
        locks: Arc<TriggerLocks>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            coordinator,
            registry,
            locks,
            events,
        }
    }

    pub async fn on_tick(&self, payload: &TickPayload) -> TickOutcome {
        let Some(adapter) = self.registry.get(payload.data_source) else {
            tracing::trace!(
                data_source = %payload.data_source,
                "No adapter registered for data source, ignoring tick"
            );
            return TickOutcome::Skipped;
        };
        match self.run_check(payload, adapter.as_ref()).await {
            Ok(outcome) => outcome,
            Err(
                e @ (EngineError::InvalidArgument(_)
                | EngineError::NotFound { .. }
                | EngineError::Conflict(_)),
            ) => {
                // Terminal failure (e.g. a malformed persisted
                // statement): retrying the same tick can never succeed,
                // so the job stops.
                tracing::error!(
                    trigger_id = %payload.trigger_id,
                    error = %e,
                    "Scheduled check failed permanently, stopping recurring job"
                );
                self.locks.forget(&payload.trigger_id);
                TickOutcome::Completed
            }
            Err(e) => {
                tracing::warn!(
                    trigger_id = %payload.trigger_id,
                    error = %e,
                    "Scheduled check failed; next tick retries"
                );
                TickOutcome::Pending
            }
        }
    }

    async fn run_check(
        &self,
        payload: &TickPayload,
        adapter: &dyn DataSourceAdapter,
    ) -> Result<TickOutcome> {
        let guard = self.locks.acquire(&payload.trigger_id).await;
        let outcome = self.check_and_consume(payload, adapter).await;
        drop(guard);
        // A completed trigger is never touched again; its lock entry
        // goes with it.
        if matches!(outcome, Ok(TickOutcome::Completed)) {
            self.locks.forget(&payload.trigger_id);
        }
        outcome
    }

    /// The locked section of a tick. The caller holds the trigger's
    /// lock for the whole reload → check → consume sequence.
    async fn check_and_consume(
        &self,
        payload: &TickPayload,
        adapter: &dyn DataSourceAdapter,
    ) -> Result<TickOutcome> {
        let Some(trigger) = self.store.get_trigger_by_id(&payload.trigger_id).await? else {
            tracing::debug!(trigger_id = %payload.trigger_id, "Tick for unknown trigger");
            return Ok(TickOutcome::Completed);
        };
        if trigger.is_deleted {
            return Ok(TickOutcome::Completed);
        }
        // Idempotency guard: delivery is at-least-once and a cancelled
        // job may have one tick still in flight.
        if trigger.is_triggered {
            return Ok(TickOutcome::Completed);
        }

        let statement: TriggerStatement = serde_json::from_str(&trigger.statement_json)
            .map_err(|e| {
                EngineError::invalid(format!(
                    "malformed statement on trigger {}: {e}",
                    trigger.id
                ))
            })?;

        if !adapter
            .criteria_check(&trigger, &statement, &payload.river_basin)
            .await?
        {
            return Ok(TickOutcome::Pending);
        }

        let now = Utc::now();
        if !self.coordinator.complete_trigger(&trigger, now, "system").await? {
            // Consumed by a racing activation after our reload.
            return Ok(TickOutcome::Completed);
        }
        tracing::info!(
            trigger_id = %trigger.id,
            phase_id = %trigger.phase_id,
            data_source = %payload.data_source,
            "Trigger criteria met"
        );
        self.events.publish(EngineEvent::TriggerActivated {
            trigger_id: trigger.id.clone(),
            phase_id: trigger.phase_id.clone(),
            data_source: payload.data_source,
            triggered_by: "system".to_string(),
            triggered_at: now,
        });

        Ok(TickOutcome::Completed)
    }
}

/// In-process recurring job queue: one tokio task per scheduled
/// trigger, ticking at a fixed interval until cancelled or the check
/// completes.
///
/// Ticks are independent units of work; a slow check on one trigger
/// never delays another. Cancellation stops future ticks only — an
/// already-running tick finishes and relies on the idempotency guard.
pub struct IntervalJobQueue {
    jobs: Arc<DashMap<String, CancellationToken>>,
    dispatcher: Arc<TickDispatcher>,
}

impl IntervalJobQueue {
    pub fn new(dispatcher: Arc<TickDispatcher>) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            dispatcher,
        }
    }

    /// Register a recurring check under the given repeat key. The key
    /// is assigned by the caller and persisted with the trigger, so the
    /// same path serves creation and startup recovery. The first tick
    /// fires immediately; callers persist the trigger row before
    /// registering so that tick always finds it.
    pub fn register(&self, repeat_key: String, payload: TickPayload, every: Duration) {
        let token = CancellationToken::new();
        self.jobs.insert(repeat_key.clone(), token.clone());

        let jobs = self.jobs.clone();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let mut tick = interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {
                        if dispatcher.on_tick(&payload).await == TickOutcome::Completed {
                            tracing::debug!(
                                trigger_id = %payload.trigger_id,
                                "Recurring check completed, stopping job"
                            );
                            break;
                        }
                    }
                }
            }
            jobs.remove(&repeat_key);
        });
    }

    /// Best-effort cancellation: stops future ticks. Returns `false`
    /// when no job is registered under the key.
    pub fn cancel(&self, repeat_key: &str) -> bool {
        if let Some((_, token)) = self.jobs.remove(repeat_key) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs.len()
    }
}
