use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use riverwatch_common::types::{
    ActivateTriggerRequest, CreateTriggerRequest, UpdateTriggerRequest,
};
use riverwatch_storage::TriggerRow;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{
    engine_error_response, error_response, success_empty_response, success_response,
    PaginationParams,
};
use crate::logging::TraceId;
use crate::state::AppState;

/// Trigger as exposed over the API: the stored statement JSON is
/// inlined as a structured value.
#[derive(Serialize)]
pub struct TriggerResponse {
    pub id: String,
    pub phase_id: String,
    pub title: String,
    pub data_source: String,
    pub statement: Value,
    pub is_mandatory: bool,
    pub is_triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
    pub triggered_by: Option<String>,
    pub repeat_key: Option<String>,
    pub transaction_hash: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TriggerRow> for TriggerResponse {
    fn from(row: TriggerRow) -> Self {
        let statement = serde_json::from_str(&row.statement_json).unwrap_or(Value::Null);
        Self {
            id: row.id,
            phase_id: row.phase_id,
            title: row.title,
            data_source: row.data_source,
            statement,
            is_mandatory: row.is_mandatory,
            is_triggered: row.is_triggered,
            triggered_at: row.triggered_at,
            triggered_by: row.triggered_by,
            repeat_key: row.repeat_key,
            transaction_hash: row.transaction_hash,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

async fn create_trigger(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<CreateTriggerRequest>,
) -> Response {
    match state.engine.create(&req).await {
        Ok(row) => success_response(StatusCode::CREATED, &trace_id, TriggerResponse::from(row)),
        Err(e) => engine_error_response(&trace_id, &e),
    }
}

#[derive(Serialize)]
struct BulkItemError {
    index: usize,
    error: String,
}

#[derive(Serialize)]
struct BulkCreateResponse {
    created: Vec<TriggerResponse>,
    failed: Vec<BulkItemError>,
}

async fn bulk_create_triggers(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(reqs): Json<Vec<CreateTriggerRequest>>,
) -> Response {
    if reqs.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "Empty trigger batch",
        );
    }

    let results = state.engine.bulk_create(&reqs).await;
    let mut created = Vec::new();
    let mut failed = Vec::new();
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(row) => created.push(TriggerResponse::from(row)),
            Err(e) => failed.push(BulkItemError {
                index,
                error: e.to_string(),
            }),
        }
    }
    let status = if created.is_empty() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::CREATED
    };
    success_response(status, &trace_id, BulkCreateResponse { created, failed })
}

#[derive(Debug, Deserialize)]
struct ListTriggersParams {
    #[serde(rename = "phase_id__eq")]
    phase_id_eq: Option<String>,
}

async fn list_triggers(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(filter): Query<ListTriggersParams>,
    Query(pagination): Query<PaginationParams>,
) -> Response {
    match state
        .engine
        .get_all(
            filter.phase_id_eq.as_deref(),
            pagination.limit(),
            pagination.offset(),
        )
        .await
    {
        Ok(rows) => {
            let items: Vec<TriggerResponse> =
                rows.into_iter().map(TriggerResponse::from).collect();
            success_response(StatusCode::OK, &trace_id, items)
        }
        Err(e) => engine_error_response(&trace_id, &e),
    }
}

async fn get_trigger(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.engine.get_one(&id).await {
        Ok(row) => success_response(StatusCode::OK, &trace_id, TriggerResponse::from(row)),
        Err(e) => engine_error_response(&trace_id, &e),
    }
}

async fn update_trigger(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTriggerRequest>,
) -> Response {
    match state.engine.update(&id, &req).await {
        Ok(row) => success_response(StatusCode::OK, &trace_id, TriggerResponse::from(row)),
        Err(e) => engine_error_response(&trace_id, &e),
    }
}

async fn remove_trigger(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(repeat_key): Path<String>,
) -> Response {
    match state.engine.remove(&repeat_key).await {
        Ok(()) => success_empty_response(StatusCode::OK, &trace_id, "Trigger removed"),
        Err(e) => engine_error_response(&trace_id, &e),
    }
}

async fn activate_trigger(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ActivateTriggerRequest>>,
) -> Response {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    match state.engine.activate_manual(&id, &req, "api").await {
        Ok(row) => success_response(StatusCode::OK, &trace_id, TriggerResponse::from(row)),
        Err(e) => engine_error_response(&trace_id, &e),
    }
}

#[derive(Debug, Deserialize)]
struct TransactionRequest {
    transaction_hash: String,
}

async fn set_transaction(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TransactionRequest>,
) -> Response {
    match state
        .engine
        .update_transaction(&id, &req.transaction_hash)
        .await
    {
        Ok(()) => success_empty_response(StatusCode::OK, &trace_id, "Transaction hash set"),
        Err(e) => engine_error_response(&trace_id, &e),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/triggers", post(create_trigger).get(list_triggers))
        .route("/v1/triggers/bulk", post(bulk_create_triggers))
        .route("/v1/triggers/{id}", get(get_trigger).patch(update_trigger))
        .route("/v1/triggers/key/{repeat_key}", delete(remove_trigger))
        .route("/v1/triggers/{id}/activate", post(activate_trigger))
        .route("/v1/triggers/{id}/transaction", put(set_transaction))
}
