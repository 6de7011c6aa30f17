use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origin of a trigger's evaluation input.
///
/// `Manual` triggers are activated by a human decision; the automated
/// sources are evaluated against the latest ingested reading for the
/// owning phase's river basin.
///
/// # Examples
///
/// ```
/// use riverwatch_common::types::DataSource;
///
/// let ds: DataSource = "GLOFAS".parse().unwrap();
/// assert_eq!(ds, DataSource::Glofas);
/// assert_eq!(ds.to_string(), "GLOFAS");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataSource {
    Manual,
    Dhm,
    Glofas,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Manual => write!(f, "MANUAL"),
            DataSource::Dhm => write!(f, "DHM"),
            DataSource::Glofas => write!(f, "GLOFAS"),
        }
    }
}

impl std::str::FromStr for DataSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MANUAL" => Ok(DataSource::Manual),
            "DHM" => Ok(DataSource::Dhm),
            "GLOFAS" => Ok(DataSource::Glofas),
            _ => Err(format!("unknown data source: {s}")),
        }
    }
}

/// Per-source threshold parameters, validated at trigger creation.
///
/// The variant tag doubles as the trigger's data source: a statement
/// always matches exactly one [`DataSource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum TriggerStatement {
    /// No parameters; activation is a human decision.
    Manual,
    /// Water-level threshold against the latest gauge reading.
    /// Boundary equality triggers.
    Dhm { threshold_water_level: f64 },
    /// Return-period probability threshold within a forecast lead-time
    /// window.
    Glofas {
        probability: f64,
        max_lead_time_days: usize,
    },
}

impl TriggerStatement {
    pub fn data_source(&self) -> DataSource {
        match self {
            TriggerStatement::Manual => DataSource::Manual,
            TriggerStatement::Dhm { .. } => DataSource::Dhm,
            TriggerStatement::Glofas { .. } => DataSource::Glofas,
        }
    }
}

/// Latest gauge measurement for a river basin, as ingested from the
/// hydrology portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhmReading {
    pub water_level: f64,
    #[serde(default)]
    pub station: Option<String>,
    #[serde(default)]
    pub danger_level: Option<f64>,
    #[serde(default)]
    pub warning_level: Option<f64>,
}

/// One row of the GLOFAS return-period probability table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnPeriodRow {
    pub return_period_years: u32,
    /// One probability per forecast-day column, aligned with the table
    /// headers.
    pub probabilities: Vec<f64>,
}

/// GLOFAS forecast payload: a probability table whose columns are
/// forecast days and whose rows are return periods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlofasReading {
    /// Forecast-day column labels (e.g. `["1", "2", "3", ...]`).
    pub headers: Vec<String>,
    /// Latest dated labels per column (e.g. `["d-1", "d-2", ...]`);
    /// used to resolve the day-zero column.
    pub day_row: Vec<String>,
    pub rows: Vec<ReturnPeriodRow>,
    #[serde(default)]
    pub station: Option<String>,
}

/// Request payload for creating a trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTriggerRequest {
    pub phase_id: String,
    pub title: String,
    pub statement: TriggerStatement,
    #[serde(default)]
    pub is_mandatory: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Request payload for updating an untriggered trigger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTriggerRequest {
    pub title: Option<String>,
    pub statement: Option<TriggerStatement>,
    pub notes: Option<String>,
}

/// Request payload for manual activation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivateTriggerRequest {
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub activated_by: Option<String>,
}

/// Events published on the engine bus for out-of-scope consumers
/// (statistics, broadcast delivery).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    TriggerActivated {
        trigger_id: String,
        phase_id: String,
        data_source: DataSource,
        triggered_by: String,
        triggered_at: DateTime<Utc>,
    },
    PhaseActivated {
        phase_id: String,
        activated_at: DateTime<Utc>,
    },
    PhaseReverted {
        phase_id: String,
        version: i32,
        reverted_by: String,
        reverted_at: DateTime<Utc>,
    },
}
