use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use riverwatch_common::types::{DataSource, DhmReading, GlofasReading};
use riverwatch_storage::SourceReadingRow;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{error_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct IngestReadingRequest {
    river_basin: String,
    data_source: String,
    payload: Value,
    /// Measurement time at the source; defaults to ingest time.
    recorded_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct ReadingResponse {
    id: String,
    river_basin: String,
    data_source: String,
    payload: Value,
    recorded_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<SourceReadingRow> for ReadingResponse {
    fn from(row: SourceReadingRow) -> Self {
        let payload = serde_json::from_str(&row.payload_json).unwrap_or(Value::Null);
        Self {
            id: row.id,
            river_basin: row.river_basin,
            data_source: row.data_source,
            payload,
            recorded_at: row.recorded_at,
            created_at: row.created_at,
        }
    }
}

/// Validate the payload against the shape the source's adapter will
/// parse on the next tick, so malformed deliveries are rejected at the
/// door instead of failing silently in the scheduler.
fn validate_payload(data_source: DataSource, payload: &Value) -> Result<(), String> {
    match data_source {
        DataSource::Manual => Err("MANUAL is not an ingestable data source".to_string()),
        DataSource::Dhm => serde_json::from_value::<DhmReading>(payload.clone())
            .map(|_| ())
            .map_err(|e| format!("invalid DHM payload: {e}")),
        DataSource::Glofas => serde_json::from_value::<GlofasReading>(payload.clone())
            .map(|_| ())
            .map_err(|e| format!("invalid GLOFAS payload: {e}")),
    }
}

async fn ingest_reading(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<IngestReadingRequest>,
) -> Response {
    let data_source: DataSource = match req.data_source.parse() {
        Ok(ds) => ds,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &e);
        }
    };
    if req.river_basin.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "river_basin must not be empty",
        );
    }
    if let Err(e) = validate_payload(data_source, &req.payload) {
        return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &e);
    }

    let row = SourceReadingRow {
        id: riverwatch_common::id::next_id(),
        river_basin: req.river_basin.clone(),
        data_source: data_source.to_string(),
        payload_json: req.payload.to_string(),
        recorded_at: req.recorded_at.unwrap_or_else(Utc::now),
        created_at: Utc::now(),
    };
    match state.store.insert_reading(&row).await {
        Ok(inserted) => {
            tracing::info!(
                river_basin = %inserted.river_basin,
                data_source = %inserted.data_source,
                "Reading ingested"
            );
            success_response(
                StatusCode::CREATED,
                &trace_id,
                ReadingResponse::from(inserted),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to store reading");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Failed to store reading",
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct LatestReadingParams {
    river_basin: String,
    data_source: String,
}

async fn latest_reading(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<LatestReadingParams>,
) -> Response {
    match state
        .store
        .most_recent_reading(&params.river_basin, &params.data_source)
        .await
    {
        Ok(Some(row)) => success_response(StatusCode::OK, &trace_id, ReadingResponse::from(row)),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            &format!(
                "No {} reading for basin '{}'",
                params.data_source, params.river_basin
            ),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to query latest reading");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Failed to query latest reading",
            )
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/readings", post(ingest_reading))
        .route("/v1/readings/latest", get(latest_reading))
}
