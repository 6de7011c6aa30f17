pub mod phases;
pub mod readings;
pub mod triggers;

use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use riverwatch_engine::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unified response envelope.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    /// Error code (0 on success).
    pub err_code: i32,
    /// Error message ("success" on success).
    pub err_msg: String,
    /// Trace ID from the request logging middleware.
    pub trace_id: String,
    /// Business payload, present when there is one.
    pub data: Option<T>,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

pub fn success_empty_response(status: StatusCode, trace_id: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: 0,
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "not_found" => 1004,
        "conflict" => 1005,
        "storage_error" => 1501,
        "internal_error" => 1500,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

/// Map an engine error onto the envelope. Not-found and conflict come
/// straight from the state machine; transient storage failures surface
/// as 503 so the caller knows a retry is reasonable.
pub fn engine_error_response(trace_id: &str, err: &EngineError) -> Response {
    match err {
        EngineError::NotFound { .. } => {
            error_response(StatusCode::NOT_FOUND, trace_id, "not_found", &err.to_string())
        }
        EngineError::Conflict(_) => {
            error_response(StatusCode::CONFLICT, trace_id, "conflict", &err.to_string())
        }
        EngineError::InvalidArgument(_) => error_response(
            StatusCode::BAD_REQUEST,
            trace_id,
            "bad_request",
            &err.to_string(),
        ),
        EngineError::Transient(e) => {
            tracing::error!(error = %e, "Storage failure while serving request");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                trace_id,
                "storage_error",
                "Storage temporarily unavailable",
            )
        }
    }
}

/// Pagination query params, shared by the list endpoints.
#[derive(Debug, Deserialize)]
pub struct PaginationParams {
    limit: Option<usize>,
    offset: Option<usize>,
}

impl PaginationParams {
    const DEFAULT_LIMIT: usize = 20;
    const MAX_LIMIT: usize = 200;

    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .min(Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

#[derive(Serialize)]
struct HealthResponse {
    version: String,
    uptime_secs: i64,
    registered_sources: Vec<String>,
    active_jobs: usize,
}

pub async fn health(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let uptime = (Utc::now() - state.start_time).num_seconds();
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: uptime,
            registered_sources: state
                .engine
                .registered_sources()
                .into_iter()
                .map(|s| s.to_string())
                .collect(),
            active_jobs: state.engine.active_jobs(),
        },
    )
}
