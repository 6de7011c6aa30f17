use crate::store::{PhaseRow, SourceReadingRow, TriggerRow, TriggerStore};
use chrono::{Duration, Utc};
use tempfile::TempDir;

async fn setup() -> (TempDir, TriggerStore) {
    riverwatch_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("riverwatch.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let store = TriggerStore::new(&url).await.unwrap();
    (dir, store)
}

fn make_phase(required_mandatory: i32, required_optional: i32) -> PhaseRow {
    let now = Utc::now();
    PhaseRow {
        id: riverwatch_common::id::next_id(),
        name: "Readiness".to_string(),
        river_basin: "Karnali".to_string(),
        required_mandatory_triggers: required_mandatory,
        required_optional_triggers: required_optional,
        received_mandatory_triggers: 0,
        received_optional_triggers: 0,
        is_active: false,
        can_revert: true,
        activated_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn make_trigger(phase_id: &str, mandatory: bool, data_source: &str) -> TriggerRow {
    let now = Utc::now();
    let statement = match data_source {
        "DHM" => r#"{"type":"DHM","threshold_water_level":10.0}"#,
        "GLOFAS" => r#"{"type":"GLOFAS","probability":0.7,"max_lead_time_days":3}"#,
        _ => r#"{"type":"MANUAL"}"#,
    };
    TriggerRow {
        id: riverwatch_common::id::next_id(),
        phase_id: phase_id.to_string(),
        title: "Gauge above danger level".to_string(),
        data_source: data_source.to_string(),
        statement_json: statement.to_string(),
        is_mandatory: mandatory,
        is_triggered: false,
        triggered_at: None,
        triggered_by: None,
        repeat_key: None,
        transaction_hash: None,
        notes: None,
        is_deleted: false,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn insert_and_get_phase() {
    let (_dir, store) = setup().await;

    let phase = store.insert_phase(&make_phase(2, 1)).await.unwrap();
    let fetched = store.get_phase_by_id(&phase.id).await.unwrap().unwrap();

    assert_eq!(fetched.name, "Readiness");
    assert_eq!(fetched.required_mandatory_triggers, 2);
    assert_eq!(fetched.required_optional_triggers, 1);
    assert!(!fetched.is_active);
    assert!(fetched.activated_at.is_none());
}

#[tokio::test]
async fn activation_edge_fires_only_when_all_requirements_met() {
    let (_dir, store) = setup().await;
    let phase = store.insert_phase(&make_phase(2, 1)).await.unwrap();
    let m1 = store
        .insert_trigger(&make_trigger(&phase.id, true, "DHM"))
        .await
        .unwrap();
    let m2 = store
        .insert_trigger(&make_trigger(&phase.id, true, "MANUAL"))
        .await
        .unwrap();
    let o1 = store
        .insert_trigger(&make_trigger(&phase.id, false, "GLOFAS"))
        .await
        .unwrap();

    let now = Utc::now();
    store
        .complete_trigger(&m1.id, &phase.id, true, now, "system")
        .await
        .unwrap();
    assert!(!store.try_activate_phase(&phase.id, Utc::now()).await.unwrap());

    store
        .complete_trigger(&m2.id, &phase.id, true, now, "admin")
        .await
        .unwrap();
    // Both mandatory received, optional still short
    assert!(!store.try_activate_phase(&phase.id, Utc::now()).await.unwrap());

    store
        .complete_trigger(&o1.id, &phase.id, false, now, "system")
        .await
        .unwrap();
    assert!(store.try_activate_phase(&phase.id, Utc::now()).await.unwrap());

    // The edge fires exactly once
    assert!(!store.try_activate_phase(&phase.id, Utc::now()).await.unwrap());

    let activated = store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert!(activated.is_active);
    assert!(activated.activated_at.is_some());
    assert_eq!(activated.received_mandatory_triggers, 2);
    assert_eq!(activated.received_optional_triggers, 1);
}

#[tokio::test]
async fn activation_requires_at_least_one_configured_requirement() {
    let (_dir, store) = setup().await;
    let phase = store.insert_phase(&make_phase(0, 0)).await.unwrap();

    // No configured requirement: the phase can never activate
    assert!(!store.try_activate_phase(&phase.id, Utc::now()).await.unwrap());
    let fetched = store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert!(!fetched.is_active);
    assert!(!fetched.has_any_requirement());
}

#[tokio::test]
async fn complete_trigger_is_single_shot_and_credits_counter_once() {
    let (_dir, store) = setup().await;
    let phase = store.insert_phase(&make_phase(2, 0)).await.unwrap();
    let trigger = store
        .insert_trigger(&make_trigger(&phase.id, true, "DHM"))
        .await
        .unwrap();

    let now = Utc::now();
    assert!(store
        .complete_trigger(&trigger.id, &phase.id, true, now, "system")
        .await
        .unwrap());
    // Redelivery: no mark, no counter credit
    assert!(!store
        .complete_trigger(&trigger.id, &phase.id, true, now, "system")
        .await
        .unwrap());

    let fetched = store.get_trigger_by_id(&trigger.id).await.unwrap().unwrap();
    assert!(fetched.is_triggered);
    assert_eq!(fetched.triggered_by.as_deref(), Some("system"));
    let counted = store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert_eq!(counted.received_mandatory_triggers, 1);
    assert_eq!(counted.received_optional_triggers, 0);
}

#[tokio::test]
async fn complete_trigger_rolls_back_mark_when_counter_credit_fails() {
    let (_dir, store) = setup().await;
    let phase = store.insert_phase(&make_phase(1, 0)).await.unwrap();
    let orphan = store
        .insert_trigger(&make_trigger("no-such-phase", true, "DHM"))
        .await
        .unwrap();

    assert!(store
        .complete_trigger(&orphan.id, "no-such-phase", true, Utc::now(), "system")
        .await
        .is_err());

    // The failed credit took the mark down with it
    let fetched = store.get_trigger_by_id(&orphan.id).await.unwrap().unwrap();
    assert!(!fetched.is_triggered);
    assert!(fetched.triggered_at.is_none());
    let untouched = store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert_eq!(untouched.received_mandatory_triggers, 0);
}

#[tokio::test]
async fn decrement_required_mandatory_stops_at_zero() {
    let (_dir, store) = setup().await;
    let phase = store.insert_phase(&make_phase(1, 0)).await.unwrap();

    assert_eq!(store.decrement_required_mandatory(&phase.id).await.unwrap(), 1);
    assert_eq!(store.decrement_required_mandatory(&phase.id).await.unwrap(), 0);

    let fetched = store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert_eq!(fetched.required_mandatory_triggers, 0);
}

#[tokio::test]
async fn revert_snapshots_triggers_and_resets_phase() {
    let (_dir, store) = setup().await;
    let phase = store.insert_phase(&make_phase(1, 1)).await.unwrap();
    let t1 = store
        .insert_trigger(&make_trigger(&phase.id, true, "DHM"))
        .await
        .unwrap();
    let t2 = store
        .insert_trigger(&make_trigger(&phase.id, false, "MANUAL"))
        .await
        .unwrap();

    let now = Utc::now();
    store
        .complete_trigger(&t1.id, &phase.id, true, now, "system")
        .await
        .unwrap();
    store
        .complete_trigger(&t2.id, &phase.id, false, now, "admin")
        .await
        .unwrap();
    assert!(store.try_activate_phase(&phase.id, now).await.unwrap());

    let outcome = store
        .revert_phase(&phase.id, "admin", Utc::now())
        .await
        .unwrap()
        .expect("revert should succeed on an active revertible phase");
    assert_eq!(outcome.version, 1);
    assert_eq!(outcome.reverted_triggers, 2);

    let reverted = store.get_phase_by_id(&phase.id).await.unwrap().unwrap();
    assert!(!reverted.is_active);
    assert!(reverted.activated_at.is_none());
    assert_eq!(reverted.received_mandatory_triggers, 0);
    assert_eq!(reverted.received_optional_triggers, 0);

    for id in [&t1.id, &t2.id] {
        let t = store.get_trigger_by_id(id).await.unwrap().unwrap();
        assert!(!t.is_triggered);
        assert!(t.triggered_at.is_none());
        assert!(t.triggered_by.is_none());
    }

    let history = store.list_history(&phase.id, Some(1)).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|h| h.reverted_by == "admin"));
    assert!(history.iter().all(|h| h.is_triggered));
    assert!(history.iter().all(|h| h.phase_activation_date.is_some()));
    assert_eq!(store.max_history_version(&phase.id).await.unwrap(), 1);
}

#[tokio::test]
async fn revert_versions_increase_monotonically() {
    let (_dir, store) = setup().await;
    let phase = store.insert_phase(&make_phase(1, 0)).await.unwrap();
    let trigger = store
        .insert_trigger(&make_trigger(&phase.id, true, "MANUAL"))
        .await
        .unwrap();

    for expected_version in 1..=2 {
        store
            .complete_trigger(&trigger.id, &phase.id, true, Utc::now(), "admin")
            .await
            .unwrap();
        assert!(store.try_activate_phase(&phase.id, Utc::now()).await.unwrap());

        let outcome = store
            .revert_phase(&phase.id, "admin", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.version, expected_version);
    }
}

#[tokio::test]
async fn revert_refuses_inactive_or_unrevertible_phase() {
    let (_dir, store) = setup().await;

    // Inactive phase
    let phase = store.insert_phase(&make_phase(1, 0)).await.unwrap();
    assert!(store
        .revert_phase(&phase.id, "admin", Utc::now())
        .await
        .unwrap()
        .is_none());

    // Active but can_revert = false
    let mut locked = make_phase(1, 0);
    locked.can_revert = false;
    let locked = store.insert_phase(&locked).await.unwrap();
    let trigger = store
        .insert_trigger(&make_trigger(&locked.id, true, "MANUAL"))
        .await
        .unwrap();
    store
        .complete_trigger(&trigger.id, &locked.id, true, Utc::now(), "admin")
        .await
        .unwrap();
    assert!(store.try_activate_phase(&locked.id, Utc::now()).await.unwrap());
    assert!(store
        .revert_phase(&locked.id, "admin", Utc::now())
        .await
        .unwrap()
        .is_none());

    // Nothing was written either way
    assert_eq!(store.max_history_version(&phase.id).await.unwrap(), 0);
    assert_eq!(store.max_history_version(&locked.id).await.unwrap(), 0);
}

#[tokio::test]
async fn most_recent_reading_picks_latest_per_pair() {
    let (_dir, store) = setup().await;
    let now = Utc::now();

    for (secs_ago, level) in [(300, 4.0), (60, 5.5), (600, 3.2)] {
        store
            .insert_reading(&SourceReadingRow {
                id: riverwatch_common::id::next_id(),
                river_basin: "Karnali".to_string(),
                data_source: "DHM".to_string(),
                payload_json: format!(r#"{{"water_level":{level}}}"#),
                recorded_at: now - Duration::seconds(secs_ago),
                created_at: now,
            })
            .await
            .unwrap();
    }
    // A different basin must not leak into the lookup
    store
        .insert_reading(&SourceReadingRow {
            id: riverwatch_common::id::next_id(),
            river_basin: "Koshi".to_string(),
            data_source: "DHM".to_string(),
            payload_json: r#"{"water_level":9.9}"#.to_string(),
            recorded_at: now,
            created_at: now,
        })
        .await
        .unwrap();

    let latest = store
        .most_recent_reading("Karnali", "DHM")
        .await
        .unwrap()
        .unwrap();
    assert!(latest.payload_json.contains("5.5"));

    assert!(store
        .most_recent_reading("Bagmati", "DHM")
        .await
        .unwrap()
        .is_none());
}
