//! Worker-facing endpoints (called from inside the sandbox) and the
//! operator's worker controls.

use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::common::{ApiError, ApiResult};
use crate::domains::workers::CompletionReport;
use crate::server::app::AppState;
use crate::server::extract::JsonBody;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub work_item_id: Uuid,
}

/// POST /api/worker/register
pub async fn register_handler(
    Extension(state): Extension<AppState>,
    JsonBody(request): JsonBody<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let (worker, item) = state.services.workers.register(request.work_item_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "workerId": worker.id, "workItem": item })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub iteration: i32,
}

/// POST /api/worker/{id}/heartbeat
pub async fn heartbeat_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(request): JsonBody<HeartbeatRequest>,
) -> ApiResult<Json<Value>> {
    state.services.workers.heartbeat(id, request.iteration).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct LockRequest {
    pub files: Vec<String>,
}

/// POST /api/worker/{id}/lock
///
/// Lock contention is not an error: the response carries the split.
pub async fn lock_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(request): JsonBody<LockRequest>,
) -> ApiResult<Json<Value>> {
    if request.files.is_empty() {
        return Err(ApiError::validation("files must not be empty"));
    }

    let outcome = state.services.workers.lock_files(id, &request.files).await?;

    let mut body = json!({
        "acquired": outcome.all_acquired(),
        "lockedFiles": outcome.acquired,
    });
    if !outcome.blocked.is_empty() {
        body["blockedFiles"] = json!(outcome.blocked);
    }
    Ok(Json(body))
}

/// POST /api/worker/{id}/unlock
pub async fn unlock_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(request): JsonBody<LockRequest>,
) -> ApiResult<Json<Value>> {
    if request.files.is_empty() {
        return Err(ApiError::validation("files must not be empty"));
    }

    let released = state.services.workers.unlock_files(id, &request.files).await?;
    Ok(Json(json!({ "success": true, "released": released })))
}

/// POST /api/worker/{id}/complete
pub async fn complete_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(report): JsonBody<CompletionReport>,
) -> ApiResult<Json<Value>> {
    state.services.workers.complete(id, report).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub error: String,
    pub iteration: i32,
}

/// POST /api/worker/{id}/fail
pub async fn fail_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(request): JsonBody<FailRequest>,
) -> ApiResult<Json<Value>> {
    if request.error.trim().is_empty() {
        return Err(ApiError::validation("error must not be empty"));
    }

    state
        .services
        .workers
        .fail(id, &request.error, request.iteration)
        .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct StuckRequest {
    pub reason: String,
    #[serde(default)]
    pub attempts: i32,
}

/// POST /api/worker/{id}/stuck
pub async fn stuck_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(request): JsonBody<StuckRequest>,
) -> ApiResult<Json<Value>> {
    if request.reason.trim().is_empty() {
        return Err(ApiError::validation("reason must not be empty"));
    }

    state
        .services
        .workers
        .stuck(id, &request.reason, request.attempts)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/workers
pub async fn list_workers_handler(
    Extension(state): Extension<AppState>,
) -> ApiResult<Json<Value>> {
    let workers = state.services.workers.list().await?;
    let stats = state.services.workers.get_stats().await?;
    Ok(Json(json!({ "workers": workers, "stats": stats })))
}

#[derive(Debug, Deserialize, Default)]
pub struct KillRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /api/workers/{id}/kill
pub async fn kill_worker_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
    body: Option<JsonBody<KillRequest>>,
) -> ApiResult<Json<Value>> {
    let reason = body
        .and_then(|JsonBody(request)| request.reason)
        .unwrap_or_else(|| "killed by operator".to_string());

    let worker = state.services.workers.kill(id, &reason).await?;
    Ok(Json(json!({ "success": true, "workerId": worker.id, "status": worker.status })))
}
