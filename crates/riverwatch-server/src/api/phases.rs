use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::{
    engine_error_response, error_response, success_response, PaginationParams,
};
use crate::logging::TraceId;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct ListPhasesParams {
    #[serde(rename = "river_basin__eq")]
    river_basin_eq: Option<String>,
}

async fn list_phases(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(filter): Query<ListPhasesParams>,
    Query(pagination): Query<PaginationParams>,
) -> Response {
    match state
        .store
        .list_phases(
            filter.river_basin_eq.as_deref(),
            pagination.limit(),
            pagination.offset(),
        )
        .await
    {
        Ok(rows) => success_response(StatusCode::OK, &trace_id, rows),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list phases");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Failed to list phases",
            )
        }
    }
}

async fn get_phase(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get_phase_by_id(&id).await {
        Ok(Some(phase)) => success_response(StatusCode::OK, &trace_id, phase),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            &format!("Phase '{id}' not found"),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to query phase");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Failed to query phase",
            )
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RevertRequest {
    reverted_by: Option<String>,
}

async fn revert_phase(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<RevertRequest>>,
) -> Response {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let actor = req.reverted_by.as_deref().unwrap_or("admin");
    match state.coordinator.revert(&id, actor).await {
        Ok(outcome) => success_response(StatusCode::OK, &trace_id, outcome),
        Err(e) => engine_error_response(&trace_id, &e),
    }
}

#[derive(Serialize)]
struct ArchiveResponse {
    phase_id: String,
    archived_triggers: usize,
}

async fn archive_phase(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.engine.archive(&id).await {
        Ok(archived) => success_response(
            StatusCode::OK,
            &trace_id,
            ArchiveResponse {
                phase_id: id,
                archived_triggers: archived,
            },
        ),
        Err(e) => engine_error_response(&trace_id, &e),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    #[serde(rename = "version__eq")]
    version_eq: Option<i32>,
}

async fn phase_history(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Response {
    match state.store.list_history(&id, params.version_eq).await {
        Ok(rows) => success_response(StatusCode::OK, &trace_id, rows),
        Err(e) => {
            tracing::error!(error = %e, "Failed to query phase history");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Failed to query phase history",
            )
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/phases", get(list_phases))
        .route("/v1/phases/{id}", get(get_phase))
        .route("/v1/phases/{id}/revert", post(revert_phase))
        .route("/v1/phases/{id}/archive", post(archive_phase))
        .route("/v1/phases/{id}/history", get(phase_history))
}
