use crate::adapters::dhm::{compare_water_levels, DhmAdapter};
use crate::adapters::glofas::{day_zero_index, table_meets_probability, GlofasAdapter};
use crate::coordinator::PhaseActivationCoordinator;
use crate::engine::TriggerEngine;
use crate::error::EngineError;
use crate::events::EventBus;
use crate::locks::TriggerLocks;
use crate::scheduler::{IntervalJobQueue, TickDispatcher, TickOutcome, TickPayload};
use crate::AdapterRegistry;
use chrono::Utc;
use riverwatch_common::types::{
    ActivateTriggerRequest, CreateTriggerRequest, DataSource, EngineEvent, GlofasReading,
    ReturnPeriodRow, TriggerStatement, UpdateTriggerRequest,
};
use riverwatch_storage::{PhaseRow, SourceReadingRow, TriggerRow, TriggerStore};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::time::{sleep, Duration};

struct Harness {
    _dir: TempDir,
    store: Arc<TriggerStore>,
    engine: TriggerEngine,
    coordinator: Arc<PhaseActivationCoordinator>,
    dispatcher: Arc<TickDispatcher>,
    events: Arc<EventBus>,
    locks: Arc<TriggerLocks>,
}

async fn setup() -> Harness {
    riverwatch_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("engine.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let store = Arc::new(TriggerStore::new(&url).await.unwrap());

    let events = Arc::new(EventBus::default());
    let locks = Arc::new(TriggerLocks::new());
    let coordinator = Arc::new(PhaseActivationCoordinator::new(
        store.clone(),
        events.clone(),
        locks.clone(),
    ));

    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(DhmAdapter::new(store.clone())));
    registry.register(Arc::new(GlofasAdapter::new(store.clone())));
    let registry = Arc::new(registry);

    let dispatcher = Arc::new(TickDispatcher::new(
        store.clone(),
        coordinator.clone(),
        registry.clone(),
        locks.clone(),
        events.clone(),
    ));
    let queue = Arc::new(IntervalJobQueue::new(dispatcher.clone()));

    // A long check interval keeps background jobs quiet after their
    // first immediate tick, so tests drive ticks explicitly.
    let engine = TriggerEngine::new(
        store.clone(),
        coordinator.clone(),
        registry,
        queue,
        locks.clone(),
        events.clone(),
        Duration::from_secs(3600),
    );

    Harness {
        _dir: dir,
        store,
        engine,
        coordinator,
        dispatcher,
        events,
        locks,
    }
}

async fn seed_phase(store: &TriggerStore, mandatory: i32, optional: i32) -> PhaseRow {
    let now = Utc::now();
    store
        .insert_phase(&PhaseRow {
            id: riverwatch_common::id::next_id(),
            name: "Action".to_string(),
            river_basin: "Karnali".to_string(),
            required_mandatory_triggers: mandatory,
            required_optional_triggers: optional,
            received_mandatory_triggers: 0,
            received_optional_triggers: 0,
            is_active: false,
            can_revert: true,
            activated_at: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap()
}

async fn seed_dhm_reading(store: &TriggerStore, basin: &str, water_level: f64) {
    store
        .insert_reading(&SourceReadingRow {
            id: riverwatch_common::id::next_id(),
            river_basin: basin.to_string(),
            data_source: "DHM".to_string(),
            payload_json: format!(r#"{{"water_level":{water_level}}}"#),
            recorded_at: Utc::now(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

fn manual_request(phase_id: &str, mandatory: bool) -> CreateTriggerRequest {
    CreateTriggerRequest {
        phase_id: phase_id.to_string(),
        title: "Manual decision".to_string(),
        statement: TriggerStatement::Manual,
        is_mandatory: mandatory,
        notes: None,
    }
}

fn dhm_request(phase_id: &str, mandatory: bool, threshold: f64) -> CreateTriggerRequest {
    CreateTriggerRequest {
        phase_id: phase_id.to_string(),
        title: "Gauge threshold".to_string(),
        statement: TriggerStatement::Dhm {
            threshold_water_level: threshold,
        },
        is_mandatory: mandatory,
        notes: None,
    }
}

fn glofas_reading(probabilities: Vec<f64>) -> GlofasReading {
    GlofasReading {
        headers: vec!["1".into(), "2".into(), "3".into()],
        day_row: vec!["d-1".into(), "d-2".into(), "d-3".into()],
        rows: vec![ReturnPeriodRow {
            return_period_years: 20,
            probabilities,
        }],
        station: None,
    }
}

// ---- Pure evaluator tests ----

#[test]
fn water_level_comparison_boundary_equality_triggers() {
    assert!(compare_water_levels(10.0, 10.0));
    assert!(compare_water_levels(10.01, 10.0));
    assert!(!compare_water_levels(9.99, 10.0));
}

#[test]
fn glofas_day_zero_is_column_of_latest_label() {
    let day_row = vec!["d-1".to_string(), "d-2".to_string(), "d-3".to_string()];
    assert_eq!(day_zero_index(&day_row), Some(0));

    // Order independent: the smallest day number wins
    let shuffled = vec!["d-3".to_string(), "d-1".to_string(), "d-2".to_string()];
    assert_eq!(day_zero_index(&shuffled), Some(1));

    assert_eq!(day_zero_index(&[]), None);
    assert_eq!(day_zero_index(&["today".to_string()]), None);
}

#[test]
fn glofas_window_is_inclusive_and_excludes_day_zero() {
    // Day zero at index 0, max lead 2 -> evaluated window is [1, 2]
    let hit_inside = glofas_reading(vec![0.1, 0.8, 0.1]);
    assert!(table_meets_probability(&hit_inside, 0.7, 2));

    let hit_at_window_end = glofas_reading(vec![0.1, 0.1, 0.9]);
    assert!(table_meets_probability(&hit_at_window_end, 0.7, 2));

    // Day zero itself is outside the window
    let only_day_zero = glofas_reading(vec![0.9, 0.1, 0.1]);
    assert!(!table_meets_probability(&only_day_zero, 0.7, 2));

    // Shorter lead time shrinks the window
    let beyond_lead = glofas_reading(vec![0.1, 0.1, 0.9]);
    assert!(!table_meets_probability(&beyond_lead, 0.7, 1));

    // Boundary equality triggers
    let exact = glofas_reading(vec![0.0, 0.7, 0.0]);
    assert!(table_meets_probability(&exact, 0.7, 2));

    let no_lead = glofas_reading(vec![0.9, 0.9, 0.9]);
    assert!(!table_meets_probability(&no_lead, 0.7, 0));
}

// ---- Engine lifecycle tests ----

#[tokio::test]
async fn create_fails_for_missing_phase() {
    let h = setup().await;
    let err = h
        .engine
        .create(&manual_request("no-such-phase", true))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "phase", .. }));
}

#[tokio::test]
async fn manual_trigger_persists_without_repeat_key() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 1, 0).await;

    let trigger = h.engine.create(&manual_request(&phase.id, true)).await.unwrap();
    assert!(trigger.repeat_key.is_none());
    assert!(!trigger.is_triggered);

    let automated = h.engine.create(&dhm_request(&phase.id, true, 10.0)).await.unwrap();
    assert!(automated.repeat_key.is_some());
}

#[tokio::test]
async fn recurring_job_survives_its_immediate_first_tick() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 1, 0).await;

    // No reading ingested: the job's immediate first tick must find the
    // persisted row, evaluate to pending, and keep ticking.
    let trigger = h.engine.create(&dhm_request(&phase.id, true, 10.0)).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(h.engine.active_jobs(), 1);
    let fetched = h.engine.get_one(&trigger.id).await.unwrap();
    assert!(!fetched.is_triggered);
}

#[tokio::test]
async fn phase_activates_only_after_all_requirements_in_any_order() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 2, 1).await;
    let mut rx = h.events.subscribe();

    let m1 = h.engine.create(&manual_request(&phase.id, true)).await.unwrap();
    let m2 = h.engine.create(&manual_request(&phase.id, true)).await.unwrap();
    let o1 = h.engine.create(&manual_request(&phase.id, false)).await.unwrap();

    let req = ActivateTriggerRequest::default();

    // Optional first, then the two mandatory ones
    h.engine.activate_manual(&o1.id, &req, "admin").await.unwrap();
    h.engine.activate_manual(&m1.id, &req, "admin").await.unwrap();
    let mid = h.store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert!(!mid.is_active, "two of three triggers must not activate");

    h.engine.activate_manual(&m2.id, &req, "admin").await.unwrap();
    let done = h.store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert!(done.is_active);
    assert_eq!(done.received_mandatory_triggers, 2);
    assert_eq!(done.received_optional_triggers, 1);
    assert!(done.activated_at.is_some());

    let mut activations = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, EngineEvent::PhaseActivated { .. }) {
            activations += 1;
        }
    }
    assert_eq!(activations, 1);
}

#[tokio::test]
async fn two_mandatory_without_optional_leaves_phase_inactive() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 2, 1).await;

    let m1 = h.engine.create(&manual_request(&phase.id, true)).await.unwrap();
    let m2 = h.engine.create(&manual_request(&phase.id, true)).await.unwrap();
    let req = ActivateTriggerRequest::default();
    h.engine.activate_manual(&m1.id, &req, "admin").await.unwrap();
    h.engine.activate_manual(&m2.id, &req, "admin").await.unwrap();

    let fetched = h.store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert!(!fetched.is_active);
}

#[tokio::test]
async fn repeated_manual_activation_conflicts_and_keeps_counters() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 2, 0).await;
    let trigger = h.engine.create(&manual_request(&phase.id, true)).await.unwrap();
    let req = ActivateTriggerRequest::default();

    h.engine.activate_manual(&trigger.id, &req, "admin").await.unwrap();
    let err = h
        .engine
        .activate_manual(&trigger.id, &req, "admin")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let fetched = h.store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert_eq!(fetched.received_mandatory_triggers, 1);
}

#[tokio::test]
async fn manual_activation_refused_for_automated_trigger() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 1, 0).await;
    let trigger = h.engine.create(&dhm_request(&phase.id, true, 99.0)).await.unwrap();

    let err = h
        .engine
        .activate_manual(&trigger.id, &ActivateTriggerRequest::default(), "admin")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn overlapping_checks_increment_exactly_once() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 1, 0).await;
    seed_dhm_reading(&h.store, &phase.river_basin, 12.5).await;

    let trigger = h.engine.create(&dhm_request(&phase.id, true, 10.0)).await.unwrap();
    let payload = TickPayload {
        trigger_id: trigger.id.clone(),
        phase_id: phase.id.clone(),
        river_basin: phase.river_basin.clone(),
        data_source: DataSource::Dhm,
    };

    // Two overlapping ticks (plus the job's own immediate first tick)
    let (a, b) = tokio::join!(h.dispatcher.on_tick(&payload), h.dispatcher.on_tick(&payload));
    assert_eq!(a, TickOutcome::Completed);
    assert_eq!(b, TickOutcome::Completed);

    let fetched_trigger = h.store.get_trigger_by_id(&trigger.id).await.unwrap().unwrap();
    assert!(fetched_trigger.is_triggered);
    assert_eq!(fetched_trigger.triggered_by.as_deref(), Some("system"));

    let fetched_phase = h.store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert_eq!(fetched_phase.received_mandatory_triggers, 1);
    assert!(fetched_phase.is_active);
}

#[tokio::test]
async fn tick_is_pending_while_below_threshold() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 1, 0).await;
    seed_dhm_reading(&h.store, &phase.river_basin, 4.0).await;

    let trigger = h.engine.create(&dhm_request(&phase.id, true, 10.0)).await.unwrap();
    let payload = TickPayload {
        trigger_id: trigger.id.clone(),
        phase_id: phase.id.clone(),
        river_basin: phase.river_basin.clone(),
        data_source: DataSource::Dhm,
    };

    assert_eq!(h.dispatcher.on_tick(&payload).await, TickOutcome::Pending);
    let fetched = h.store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert_eq!(fetched.received_mandatory_triggers, 0);
}

#[tokio::test]
async fn glofas_tick_completes_on_probability_window() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 1, 0).await;

    let reading = glofas_reading(vec![0.1, 0.85, 0.2]);
    h.store
        .insert_reading(&SourceReadingRow {
            id: riverwatch_common::id::next_id(),
            river_basin: phase.river_basin.clone(),
            data_source: "GLOFAS".to_string(),
            payload_json: serde_json::to_string(&reading).unwrap(),
            recorded_at: Utc::now(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let trigger = h
        .engine
        .create(&CreateTriggerRequest {
            phase_id: phase.id.clone(),
            title: "Flood probability".to_string(),
            statement: TriggerStatement::Glofas {
                probability: 0.7,
                max_lead_time_days: 2,
            },
            is_mandatory: true,
            notes: None,
        })
        .await
        .unwrap();

    let payload = TickPayload {
        trigger_id: trigger.id.clone(),
        phase_id: phase.id.clone(),
        river_basin: phase.river_basin.clone(),
        data_source: DataSource::Glofas,
    };
    assert_eq!(h.dispatcher.on_tick(&payload).await, TickOutcome::Completed);

    let fetched = h.store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert!(fetched.is_active);
}

#[tokio::test]
async fn tick_stops_on_malformed_statement() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 1, 0).await;
    seed_dhm_reading(&h.store, &phase.river_basin, 12.0).await;

    // Corrupt persisted statement: retrying can never succeed, so the
    // tick must report completion and stop the job instead of spinning.
    let now = Utc::now();
    let trigger = h
        .store
        .insert_trigger(&TriggerRow {
            id: riverwatch_common::id::next_id(),
            phase_id: phase.id.clone(),
            title: "Corrupted".to_string(),
            data_source: "DHM".to_string(),
            statement_json: "not a statement".to_string(),
            is_mandatory: true,
            is_triggered: false,
            triggered_at: None,
            triggered_by: None,
            repeat_key: None,
            transaction_hash: None,
            notes: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    let payload = TickPayload {
        trigger_id: trigger.id.clone(),
        phase_id: phase.id.clone(),
        river_basin: phase.river_basin.clone(),
        data_source: DataSource::Dhm,
    };
    assert_eq!(h.dispatcher.on_tick(&payload).await, TickOutcome::Completed);

    let fetched = h.store.get_trigger_by_id(&trigger.id).await.unwrap().unwrap();
    assert!(!fetched.is_triggered);
    let fetched_phase = h.store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert_eq!(fetched_phase.received_mandatory_triggers, 0);
}

#[tokio::test]
async fn tick_for_unregistered_source_is_silent_noop() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 1, 0).await;

    let empty_registry = Arc::new(AdapterRegistry::new());
    let dispatcher = TickDispatcher::new(
        h.store.clone(),
        h.coordinator.clone(),
        empty_registry,
        Arc::new(TriggerLocks::new()),
        h.events.clone(),
    );

    let payload = TickPayload {
        trigger_id: "whatever".to_string(),
        phase_id: phase.id.clone(),
        river_basin: phase.river_basin.clone(),
        data_source: DataSource::Glofas,
    };
    assert_eq!(dispatcher.on_tick(&payload).await, TickOutcome::Skipped);
}

#[tokio::test]
async fn remove_conflicts_when_phase_is_active() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 1, 0).await;
    let trigger = h.engine.create(&dhm_request(&phase.id, true, 50.0)).await.unwrap();
    let repeat_key = trigger.repeat_key.clone().unwrap();

    // Activate the phase through a sibling manual trigger
    let sibling = h.engine.create(&manual_request(&phase.id, true)).await.unwrap();
    h.engine
        .activate_manual(&sibling.id, &ActivateTriggerRequest::default(), "admin")
        .await
        .unwrap();
    let active = h.store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert!(active.is_active);

    let err = h.engine.remove(&repeat_key).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    // State unchanged
    let fetched = h.store.get_trigger_by_id(&trigger.id).await.unwrap().unwrap();
    assert!(!fetched.is_deleted);
    let fetched_phase = h.store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert!(fetched_phase.is_active);
    assert_eq!(fetched_phase.required_mandatory_triggers, 1);
}

#[tokio::test]
async fn remove_conflicts_when_already_triggered() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 2, 0).await;
    let trigger = h.engine.create(&dhm_request(&phase.id, true, 10.0)).await.unwrap();
    let repeat_key = trigger.repeat_key.clone().unwrap();

    h.store
        .complete_trigger(&trigger.id, &phase.id, true, Utc::now(), "system")
        .await
        .unwrap();

    let err = h.engine.remove(&repeat_key).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn remove_preserves_optional_trigger_viability() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 0, 1).await;
    let o1 = h.engine.create(&dhm_request(&phase.id, false, 10.0)).await.unwrap();
    let o2 = h.engine.create(&dhm_request(&phase.id, false, 20.0)).await.unwrap();

    // Two live optional triggers against a requirement of one: the
    // first removal is fine, the second would break viability.
    h.engine.remove(&o1.repeat_key.clone().unwrap()).await.unwrap();
    let err = h
        .engine
        .remove(&o2.repeat_key.clone().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn removing_mandatory_trigger_lowers_required_bar() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 2, 0).await;
    let trigger = h.engine.create(&dhm_request(&phase.id, true, 10.0)).await.unwrap();

    h.engine.remove(&trigger.repeat_key.clone().unwrap()).await.unwrap();

    let fetched = h.store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert_eq!(fetched.required_mandatory_triggers, 1);
    let gone = h.engine.get_one(&trigger.id).await.unwrap_err();
    assert!(matches!(gone, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn update_is_refused_once_triggered() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 1, 0).await;
    let trigger = h.engine.create(&manual_request(&phase.id, true)).await.unwrap();

    h.engine
        .activate_manual(&trigger.id, &ActivateTriggerRequest::default(), "admin")
        .await
        .unwrap();

    let err = h
        .engine
        .update(
            &trigger.id,
            &UpdateTriggerRequest {
                title: Some("renamed".to_string()),
                ..UpdateTriggerRequest::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn update_transaction_attaches_reference() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 1, 0).await;
    let trigger = h.engine.create(&manual_request(&phase.id, true)).await.unwrap();

    h.engine.update_transaction(&trigger.id, "0xabc123").await.unwrap();
    let fetched = h.engine.get_one(&trigger.id).await.unwrap();
    assert_eq!(fetched.transaction_hash.as_deref(), Some("0xabc123"));

    let err = h
        .engine
        .update_transaction("missing", "0xdead")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn bulk_create_continues_past_failures() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 1, 0).await;

    let reqs = vec![
        manual_request(&phase.id, true),
        manual_request("missing-phase", true),
        manual_request(&phase.id, false),
    ];
    let results = h.engine.bulk_create(&reqs).await;
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(
        results[1].as_ref().unwrap_err(),
        EngineError::NotFound { .. }
    ));
    assert!(results[2].is_ok());

    let listed = h.engine.get_all(Some(&phase.id), 100, 0).await.unwrap();
    assert_eq!(listed.len(), 2);
}

#[tokio::test]
async fn revert_restores_triggers_and_publishes_event() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 1, 0).await;
    let trigger = h.engine.create(&manual_request(&phase.id, true)).await.unwrap();
    let mut rx = h.events.subscribe();

    h.engine
        .activate_manual(&trigger.id, &ActivateTriggerRequest::default(), "admin")
        .await
        .unwrap();

    let outcome = h.coordinator.revert(&phase.id, "coordinator").await.unwrap();
    assert_eq!(outcome.version, 1);
    assert_eq!(outcome.reverted_triggers, 1);

    let fetched = h.engine.get_one(&trigger.id).await.unwrap();
    assert!(!fetched.is_triggered);

    let mut reverted_events = 0;
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::PhaseReverted { version, .. } = event {
            assert_eq!(version, 1);
            reverted_events += 1;
        }
    }
    assert_eq!(reverted_events, 1);

    // A second revert without re-activation conflicts
    let err = h.coordinator.revert(&phase.id, "coordinator").await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn revert_waits_for_inflight_check_to_finish() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 1, 0).await;
    let trigger = h.engine.create(&manual_request(&phase.id, true)).await.unwrap();
    h.engine
        .activate_manual(&trigger.id, &ActivateTriggerRequest::default(), "admin")
        .await
        .unwrap();

    // Hold the trigger's lock the way an in-flight check does for its
    // whole reload-check-consume sequence
    let guard = h.locks.acquire(&trigger.id).await;
    let coordinator = h.coordinator.clone();
    let phase_id = phase.id.clone();
    let revert = tokio::spawn(async move { coordinator.revert(&phase_id, "admin").await });

    sleep(Duration::from_millis(100)).await;
    assert!(
        !revert.is_finished(),
        "revert must not run while a check is in flight"
    );

    drop(guard);
    let outcome = revert.await.unwrap().unwrap();
    assert_eq!(outcome.reverted_triggers, 1);

    // Post-revert state is consistent: no consumed trigger against a
    // zeroed counter
    let fetched = h.store.get_trigger_by_id(&trigger.id).await.unwrap().unwrap();
    assert!(!fetched.is_triggered);
    let fetched_phase = h.store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert!(!fetched_phase.is_active);
    assert_eq!(fetched_phase.received_mandatory_triggers, 0);
}

#[tokio::test]
async fn revert_missing_phase_is_not_found() {
    let h = setup().await;
    let err = h.coordinator.revert("missing", "admin").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn archive_soft_deletes_all_phase_triggers() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 1, 1).await;
    h.engine.create(&manual_request(&phase.id, true)).await.unwrap();
    h.engine.create(&dhm_request(&phase.id, false, 10.0)).await.unwrap();

    let archived = h.engine.archive(&phase.id).await.unwrap();
    assert_eq!(archived, 2);

    let listed = h.engine.get_all(Some(&phase.id), 100, 0).await.unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn lock_entries_are_dropped_once_triggered() {
    let h = setup().await;
    let phase = seed_phase(&h.store, 2, 0).await;

    let manual = h.engine.create(&manual_request(&phase.id, true)).await.unwrap();
    h.engine
        .activate_manual(&manual.id, &ActivateTriggerRequest::default(), "admin")
        .await
        .unwrap();
    assert_eq!(h.locks.len(), 0);

    seed_dhm_reading(&h.store, &phase.river_basin, 12.0).await;
    let automated = h.engine.create(&dhm_request(&phase.id, true, 10.0)).await.unwrap();
    let payload = TickPayload {
        trigger_id: automated.id.clone(),
        phase_id: phase.id.clone(),
        river_basin: phase.river_basin.clone(),
        data_source: DataSource::Dhm,
    };
    assert_eq!(h.dispatcher.on_tick(&payload).await, TickOutcome::Completed);

    // The job's own first tick may still be settling
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.locks.len(), 0);
}
