use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::{Deserialize, Serialize};

use crate::entities::source_reading::{self, Column, Entity};
use crate::error::Result;
use crate::store::TriggerStore;

/// Ingested measurement row (from the `source_readings` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReadingRow {
    pub id: String,
    pub river_basin: String,
    pub data_source: String,
    pub payload_json: String,
    pub recorded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

fn to_row(m: source_reading::Model) -> SourceReadingRow {
    SourceReadingRow {
        id: m.id,
        river_basin: m.river_basin,
        data_source: m.data_source,
        payload_json: m.payload_json,
        recorded_at: m.recorded_at.with_timezone(&Utc),
        created_at: m.created_at.with_timezone(&Utc),
    }
}

impl TriggerStore {
    pub async fn insert_reading(&self, row: &SourceReadingRow) -> Result<SourceReadingRow> {
        let am = source_reading::ActiveModel {
            id: Set(row.id.clone()),
            river_basin: Set(row.river_basin.clone()),
            data_source: Set(row.data_source.clone()),
            payload_json: Set(row.payload_json.clone()),
            recorded_at: Set(row.recorded_at.fixed_offset()),
            created_at: Set(Utc::now().fixed_offset()),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_row(model))
    }

    /// Latest ingested measurement for a basin/data-source pair, or
    /// `None` when nothing has been ingested yet. Absence is the normal
    /// state before the first upstream delivery, not an error.
    pub async fn most_recent_reading(
        &self,
        river_basin: &str,
        data_source: &str,
    ) -> Result<Option<SourceReadingRow>> {
        let model = Entity::find()
            .filter(Column::RiverBasin.eq(river_basin))
            .filter(Column::DataSource.eq(data_source))
            .order_by(Column::RecordedAt, Order::Desc)
            .limit(1)
            .one(self.db())
            .await?;
        Ok(model.map(to_row))
    }
}
