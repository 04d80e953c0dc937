//! Fleet status endpoint.

use axum::extract::Extension;
use axum::Json;
use serde_json::{json, Value};

use crate::server::app::AppState;

/// GET /api/status
///
/// Fleet health is derived from the spawn gate: `healthy` when a spawn
/// would be admitted, `degraded` when any gate blocks it, `error` when
/// the gate state itself cannot be read (KV or DB outage).
pub async fn status_handler(Extension(state): Extension<AppState>) -> Json<Value> {
    match state.services.rate.get_status().await {
        Ok(rate) => {
            let status = if rate.can_spawn { "healthy" } else { "degraded" };
            Json(json!({
                "status": status,
                "rate": rate,
            }))
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to read rate limiter status");
            Json(json!({
                "status": "error",
            }))
        }
    }
}
