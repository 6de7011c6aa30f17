use async_trait::async_trait;
use riverwatch_common::types::{DataSource, GlofasReading, TriggerStatement};
use riverwatch_storage::{TriggerRow, TriggerStore};
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::DataSourceAdapter;

/// Trailing integer of a forecast-day label (`"d-3"` -> 3, `"12"` -> 12).
fn trailing_number(label: &str) -> Option<i64> {
    let s = label.trim();
    let start = s
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    let tail = &s[start..];
    if tail.is_empty() {
        None
    } else {
        tail.parse().ok()
    }
}

/// Resolve the day-zero column from the latest forecast-day label: the
/// label carrying the smallest day number is the most recently issued
/// forecast day, and its column index is day zero.
pub fn day_zero_index(day_row: &[String]) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;
    for (idx, label) in day_row.iter().enumerate() {
        let Some(day) = trailing_number(label) else {
            continue;
        };
        match best {
            Some((_, current)) if current <= day => {}
            _ => best = Some((idx, day)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Whether any probability in the inclusive forecast window
/// `[day_zero + 1, day_zero + max_lead_time_days]` reaches the
/// threshold. First match wins, no averaging; the window is clamped to
/// the table width.
pub fn table_meets_probability(
    reading: &GlofasReading,
    probability: f64,
    max_lead_time_days: usize,
) -> bool {
    let Some(day_zero) = day_zero_index(&reading.day_row) else {
        return false;
    };
    let width = reading.headers.len();
    if width == 0 || max_lead_time_days == 0 {
        return false;
    }
    let start = day_zero + 1;
    let end = (day_zero + max_lead_time_days).min(width - 1);
    if start > end {
        return false;
    }
    for row in &reading.rows {
        for idx in start..=end {
            if let Some(p) = row.probabilities.get(idx) {
                if *p >= probability {
                    return true;
                }
            }
        }
    }
    false
}

/// Evaluates GLOFAS return-period probability tables within the
/// configured lead-time window.
pub struct GlofasAdapter {
    store: Arc<TriggerStore>,
}

impl GlofasAdapter {
    pub fn new(store: Arc<TriggerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DataSourceAdapter for GlofasAdapter {
    fn data_source(&self) -> DataSource {
        DataSource::Glofas
    }

    async fn criteria_check(
        &self,
        trigger: &TriggerRow,
        statement: &TriggerStatement,
        river_basin: &str,
    ) -> Result<bool> {
        let TriggerStatement::Glofas {
            probability,
            max_lead_time_days,
        } = statement
        else {
            return Err(EngineError::invalid(format!(
                "trigger {} carries a non-GLOFAS statement",
                trigger.id
            )));
        };

        let Some(reading) = self
            .store
            .most_recent_reading(river_basin, &DataSource::Glofas.to_string())
            .await?
        else {
            tracing::debug!(
                trigger_id = %trigger.id,
                river_basin,
                "No GLOFAS reading ingested yet"
            );
            return Ok(false);
        };

        let reading: GlofasReading = serde_json::from_str(&reading.payload_json)
            .map_err(|e| EngineError::invalid(format!("malformed GLOFAS reading payload: {e}")))?;

        let met = table_meets_probability(&reading, *probability, *max_lead_time_days);
        tracing::debug!(
            trigger_id = %trigger.id,
            probability,
            max_lead_time_days,
            met,
            "GLOFAS criteria check"
        );
        Ok(met)
    }
}
