use chrono::Utc;
use riverwatch_common::types::DataSource;
use riverwatch_storage::{PhaseRow, TriggerRow, TriggerStore};

use crate::config::PhasesSeedFile;

/// Initialize phases and their triggers from a JSON seed file.
///
/// Phases are deduplicated by `(name, river_basin)`: an existing pair
/// is skipped together with its triggers. Automated triggers get a
/// repeat key at insert time; the server registers their recurring
/// checks on the next startup.
pub async fn init_from_seed_file(store: &TriggerStore, seed_path: &str) -> anyhow::Result<()> {
    let seed_content = std::fs::read_to_string(seed_path)
        .map_err(|e| anyhow::anyhow!("Failed to read seed file '{}': {}", seed_path, e))?;
    let seed: PhasesSeedFile = serde_json::from_str(&seed_content)
        .map_err(|e| anyhow::anyhow!("Failed to parse seed file '{}': {}", seed_path, e))?;

    let existing = store.list_phases(None, 10000, 0).await?;
    let existing_keys: std::collections::HashSet<(String, String)> = existing
        .iter()
        .map(|p| (p.name.clone(), p.river_basin.clone()))
        .collect();

    let mut phases_created = 0u32;
    let mut phases_skipped = 0u32;
    let mut triggers_created = 0u32;

    for sp in &seed.phases {
        if existing_keys.contains(&(sp.name.clone(), sp.river_basin.clone())) {
            tracing::warn!(name = %sp.name, river_basin = %sp.river_basin, "Phase already exists, skipping");
            phases_skipped += 1;
            continue;
        }

        let now = Utc::now();
        let row = PhaseRow {
            id: riverwatch_common::id::next_id(),
            name: sp.name.clone(),
            river_basin: sp.river_basin.clone(),
            required_mandatory_triggers: sp.required_mandatory_triggers,
            required_optional_triggers: sp.required_optional_triggers,
            received_mandatory_triggers: 0,
            received_optional_triggers: 0,
            is_active: false,
            can_revert: sp.can_revert,
            activated_at: None,
            created_at: now,
            updated_at: now,
        };

        let phase = match store.insert_phase(&row).await {
            Ok(inserted) => {
                tracing::info!(name = %sp.name, id = %inserted.id, "Phase created");
                phases_created += 1;
                inserted
            }
            Err(e) => {
                tracing::error!(name = %sp.name, error = %e, "Failed to create phase");
                continue;
            }
        };

        for st in &sp.triggers {
            let data_source = st.statement.data_source();
            let statement_json = match serde_json::to_string(&st.statement) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(title = %st.title, error = %e, "Unserializable statement, skipping trigger");
                    continue;
                }
            };
            let repeat_key = if data_source == DataSource::Manual {
                None
            } else {
                Some(riverwatch_common::id::next_id())
            };

            let now = Utc::now();
            let trigger = TriggerRow {
                id: riverwatch_common::id::next_id(),
                phase_id: phase.id.clone(),
                title: st.title.clone(),
                data_source: data_source.to_string(),
                statement_json,
                is_mandatory: st.is_mandatory,
                is_triggered: false,
                triggered_at: None,
                triggered_by: None,
                repeat_key,
                transaction_hash: None,
                notes: st.notes.clone(),
                is_deleted: false,
                created_at: now,
                updated_at: now,
            };
            match store.insert_trigger(&trigger).await {
                Ok(inserted) => {
                    tracing::info!(
                        title = %st.title,
                        id = %inserted.id,
                        phase = %phase.id,
                        "Trigger created"
                    );
                    triggers_created += 1;
                }
                Err(e) => {
                    tracing::error!(title = %st.title, error = %e, "Failed to create trigger");
                }
            }
        }
    }

    tracing::info!(
        phases_created,
        phases_skipped,
        triggers_created,
        "init-phases completed"
    );
    Ok(())
}
