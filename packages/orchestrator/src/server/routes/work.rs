//! Operator-facing work-item endpoints.

use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::common::{ApiError, ApiResult};
use crate::domains::telemetry::FactoryMetrics;
use crate::domains::work_items::{AddWorkItemRequest, WorkItemStatus};
use crate::server::app::AppState;
use crate::server::extract::JsonBody;

/// POST /api/work
pub async fn add_work_handler(
    Extension(state): Extension<AppState>,
    JsonBody(request): JsonBody<AddWorkItemRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let item = state.services.queue.add(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": item.id, "status": item.status })),
    ))
}

/// GET /api/work/{id}
pub async fn get_work_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let item = state.services.queue.get(id).await?;
    Ok(Json(serde_json::to_value(item).map_err(|e| ApiError::Internal(e.into()))?))
}

#[derive(Debug, Deserialize)]
pub struct ListWorkParams {
    pub status: Option<String>,
}

/// GET /api/work?status=queued
pub async fn list_work_handler(
    Extension(state): Extension<AppState>,
    Query(params): Query<ListWorkParams>,
) -> ApiResult<Json<Value>> {
    let status = match params.status.as_deref() {
        Some(raw) => Some(parse_status(raw)?),
        None => None,
    };
    let items = state.services.queue.list(status).await?;
    Ok(Json(json!({ "items": items })))
}

/// POST /api/work/{id}/cancel
pub async fn cancel_work_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let item = state.services.queue.cancel(id).await?;
    Ok(Json(json!({ "id": item.id, "status": item.status })))
}

#[derive(Debug, Deserialize)]
pub struct SpecWritebackRequest {
    pub spec: String,
    pub branch: String,
}

/// POST /api/work/{id}/spec: spec-generation writeback.
pub async fn spec_writeback_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(request): JsonBody<SpecWritebackRequest>,
) -> ApiResult<Json<Value>> {
    let item = state
        .services
        .queue
        .attach_generated_spec(id, &request.spec, &request.branch)
        .await?;
    Ok(Json(json!({ "id": item.id, "status": item.status })))
}

/// GET /api/queue: items currently waiting for dispatch.
pub async fn queue_handler(Extension(state): Extension<AppState>) -> ApiResult<Json<Value>> {
    let items = state
        .services
        .queue
        .list(Some(WorkItemStatus::Queued))
        .await?;
    Ok(Json(json!({ "items": items })))
}

/// GET /api/metrics
pub async fn metrics_handler(Extension(state): Extension<AppState>) -> ApiResult<Json<Value>> {
    let rate = state.services.rate.get_status().await?;
    let metrics = FactoryMetrics::compute(
        rate.iterations_today,
        rate.daily_budget,
        &state.services.pool,
    )
    .await
    .map_err(ApiError::Internal)?;
    Ok(Json(serde_json::to_value(metrics).map_err(|e| ApiError::Internal(e.into()))?))
}

fn parse_status(raw: &str) -> ApiResult<WorkItemStatus> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|_| ApiError::validation(format!("unknown status filter: {}", raw)))
}
