use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_initial_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

const UP_SQL: &str = "
CREATE TABLE IF NOT EXISTS phases (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    river_basin TEXT NOT NULL,
    required_mandatory_triggers INTEGER NOT NULL DEFAULT 0,
    required_optional_triggers INTEGER NOT NULL DEFAULT 0,
    received_mandatory_triggers INTEGER NOT NULL DEFAULT 0,
    received_optional_triggers INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 0,
    can_revert INTEGER NOT NULL DEFAULT 0,
    activated_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_phases_river_basin ON phases(river_basin);

CREATE TABLE IF NOT EXISTS triggers (
    id TEXT PRIMARY KEY NOT NULL,
    phase_id TEXT NOT NULL,
    title TEXT NOT NULL,
    data_source TEXT NOT NULL,
    statement_json TEXT NOT NULL,
    is_mandatory INTEGER NOT NULL DEFAULT 0,
    is_triggered INTEGER NOT NULL DEFAULT 0,
    triggered_at TEXT,
    triggered_by TEXT,
    repeat_key TEXT UNIQUE,
    transaction_hash TEXT,
    notes TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_triggers_phase_id ON triggers(phase_id);
CREATE INDEX IF NOT EXISTS idx_triggers_repeat_key ON triggers(repeat_key);

CREATE TABLE IF NOT EXISTS trigger_history (
    id TEXT PRIMARY KEY NOT NULL,
    phase_id TEXT NOT NULL,
    trigger_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    title TEXT NOT NULL,
    data_source TEXT NOT NULL,
    statement_json TEXT NOT NULL,
    is_mandatory INTEGER NOT NULL DEFAULT 0,
    is_triggered INTEGER NOT NULL DEFAULT 0,
    triggered_at TEXT,
    triggered_by TEXT,
    phase_activation_date TEXT,
    reverted_at TEXT NOT NULL,
    reverted_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trigger_history_phase_version
    ON trigger_history(phase_id, version);
CREATE INDEX IF NOT EXISTS idx_trigger_history_trigger_id
    ON trigger_history(trigger_id);

CREATE TABLE IF NOT EXISTS source_readings (
    id TEXT PRIMARY KEY NOT NULL,
    river_basin TEXT NOT NULL,
    data_source TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_source_readings_lookup
    ON source_readings(river_basin, data_source, recorded_at DESC);
";

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS source_readings;
DROP TABLE IF EXISTS trigger_history;
DROP TABLE IF EXISTS triggers;
DROP TABLE IF EXISTS phases;
";
