use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use syncline_common::error::SynclineError;
use syncline_db::checkpoint::models::SyncCheckpoint;
use syncline_db::edit::models::{DateField, SalesDateEdit};
use syncline_db::run::models::{RunScope, RunTrigger};

use crate::api::error::ApiError;
use crate::api::requests::{ListRunsQuery, SubmitEditRequest, TriggerRequest};
use crate::api::responses::{
    InfoResponse, ListDiscrepanciesResponse, ListRunsResponse, SubmitEditResponse, TriggerResponse,
};
use crate::api::AppState;
use crate::orchestrator::RunRequest;
use crate::queue::QueueSnapshot;

const DEFAULT_RUN_LIMIT: i64 = 20;
const MAX_RUN_LIMIT: i64 = 200;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn info(State(state): State<AppState>) -> Json<InfoResponse> {
    let service = state.service.as_ref().clone();
    let uptime_secs = service.uptime_secs(Utc::now());
    Json(InfoResponse {
        service,
        uptime_secs,
    })
}

/// The body is optional; an empty one requests a full run.
pub async fn trigger_sync(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let body: TriggerRequest = if body.iter().all(u8::is_ascii_whitespace) {
        TriggerRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| SynclineError::Validation(format!("invalid trigger request: {e}")))?
    };
    let outcome = state.queue.submit(RunRequest {
        trigger: RunTrigger::Manual,
        scope: body.scope.unwrap_or(RunScope::Full),
    });
    Ok((StatusCode::ACCEPTED, Json(TriggerResponse { outcome })))
}

pub async fn queue_status(State(state): State<AppState>) -> Json<QueueSnapshot> {
    Json(state.queue.snapshot())
}

pub async fn submit_sales_date(
    State(state): State<AppState>,
    Json(body): Json<SubmitEditRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let field: DateField = body.field.parse().map_err(SynclineError::Validation)?;
    if body.origin_user.trim().is_empty() {
        return Err(ApiError(SynclineError::Validation(
            "origin_user must not be empty".to_string(),
        )));
    }

    let forecast = state
        .stores
        .forecasts
        .get(&body.opportunity_id)
        .await?
        .ok_or_else(|| {
            ApiError(SynclineError::NotFound(format!(
                "opportunity not found: {}",
                body.opportunity_id
            )))
        })?;

    let previous_value = match (body.previous_value, field) {
        (Some(value), _) => Some(value),
        (None, DateField::CloseDate) => Some(forecast.expected_date),
        (None, _) => None,
    };
    let edit = SalesDateEdit::new(
        &forecast.opportunity_id,
        field,
        previous_value,
        body.new_value,
        body.origin_user.trim(),
    );
    let stored = state.stores.edits.submit(&edit).await?;

    if field == DateField::CloseDate {
        state
            .stores
            .forecasts
            .set_expected_date(&forecast.opportunity_id, body.new_value)
            .await?;
    }

    tracing::info!(
        edit_id = %stored.id,
        opportunity = %stored.opportunity_id,
        field = field.as_str(),
        new_value = %stored.new_value,
        "sales-date edit submitted"
    );

    let outcome = state.queue.submit(RunRequest {
        trigger: RunTrigger::Manual,
        scope: RunScope::PushOnly,
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitEditResponse {
            data: stored,
            outcome,
        }),
    ))
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<ListRunsResponse>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RUN_LIMIT)
        .clamp(1, MAX_RUN_LIMIT);
    let data = state.stores.runs.list_recent(limit).await?;
    let count = data.len();
    Ok(Json(ListRunsResponse { data, count }))
}

pub async fn get_checkpoint(
    State(state): State<AppState>,
    Path(stream): Path<String>,
) -> Result<Json<SyncCheckpoint>, ApiError> {
    let checkpoint = state
        .stores
        .checkpoints
        .get(&stream)
        .await?
        .ok_or_else(|| ApiError(SynclineError::NotFound(format!("checkpoint not found: {stream}"))))?;
    Ok(Json(checkpoint))
}

pub async fn list_discrepancies(
    State(state): State<AppState>,
) -> Result<Json<ListDiscrepanciesResponse>, ApiError> {
    let data = state.stores.discrepancies.list_open().await?;
    let count = data.len();
    Ok(Json(ListDiscrepanciesResponse { data, count }))
}
