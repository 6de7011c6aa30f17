use async_trait::async_trait;
use riverwatch_common::types::{DataSource, DhmReading, TriggerStatement};
use riverwatch_storage::{TriggerRow, TriggerStore};
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::DataSourceAdapter;

/// Water-level comparison against the configured threshold.
/// Boundary equality triggers.
pub fn compare_water_levels(level: f64, threshold: f64) -> bool {
    level >= threshold
}

/// Evaluates DHM gauge readings: the criterion is met when the latest
/// water level has reached the statement's threshold.
pub struct DhmAdapter {
    store: Arc<TriggerStore>,
}

impl DhmAdapter {
    pub fn new(store: Arc<TriggerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DataSourceAdapter for DhmAdapter {
    fn data_source(&self) -> DataSource {
        DataSource::Dhm
    }

    async fn criteria_check(
        &self,
        trigger: &TriggerRow,
        statement: &TriggerStatement,
        river_basin: &str,
    ) -> Result<bool> {
        let TriggerStatement::Dhm {
            threshold_water_level,
        } = statement
        else {
            return Err(EngineError::invalid(format!(
                "trigger {} carries a non-DHM statement",
                trigger.id
            )));
        };

        let Some(reading) = self
            .store
            .most_recent_reading(river_basin, &DataSource::Dhm.to_string())
            .await?
        else {
            tracing::debug!(
                trigger_id = %trigger.id,
                river_basin,
                "No DHM reading ingested yet"
            );
            return Ok(false);
        };

        let reading: DhmReading = serde_json::from_str(&reading.payload_json)
            .map_err(|e| EngineError::invalid(format!("malformed DHM reading payload: {e}")))?;

        let met = compare_water_levels(reading.water_level, *threshold_water_level);
        tracing::debug!(
            trigger_id = %trigger.id,
            water_level = reading.water_level,
            threshold = threshold_water_level,
            met,
            "DHM criteria check"
        );
        Ok(met)
    }
}
