//! Health endpoint for the control plane.
//!
//! A green check answers one question: could the orchestrator dispatch
//! work right now? That needs the relational store (queue + fleet tables)
//! and the rate-limiter KV, so both are probed, and the store probe reads
//! the dispatch counters rather than a bare ping.

use std::time::Duration;

use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::server::app::AppState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    status: &'static str,
    store: StoreProbe,
    kv: KvProbe,
}

/// Relational-store probe. Counts double as liveness proof: if they came
/// back, the same tables the dispatch loop reads are usable.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoreProbe {
    reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    queued_items: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_workers: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KvProbe {
    reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// GET /health
///
/// 200 when both stores answer within the probe timeout, 503 otherwise.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthReport>) {
    let store = probe_store(&state).await;
    let kv = probe_kv(&state).await;

    let dispatchable = store.reachable && kv.reachable;

    (
        if dispatchable {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        },
        Json(HealthReport {
            status: if dispatchable { "healthy" } else { "unhealthy" },
            store,
            kv,
        }),
    )
}

async fn probe_store(state: &AppState) -> StoreProbe {
    let unreachable = |error: String| StoreProbe {
        reachable: false,
        queued_items: None,
        active_workers: None,
        error: Some(error),
    };

    let counts = tokio::time::timeout(
        PROBE_TIMEOUT,
        sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM work_items WHERE status = 'queued'),
                (SELECT COUNT(*) FROM workers WHERE status IN ('starting', 'running'))
            "#,
        )
        .fetch_one(&state.services.pool),
    )
    .await;

    match counts {
        Ok(Ok((queued, active))) => StoreProbe {
            reachable: true,
            queued_items: Some(queued),
            active_workers: Some(active),
            error: None,
        },
        Ok(Err(e)) => unreachable(e.to_string()),
        Err(_) => unreachable(format!("no answer within {:?}", PROBE_TIMEOUT)),
    }
}

async fn probe_kv(state: &AppState) -> KvProbe {
    let mut kv = state.services.kv.clone();
    let ping = tokio::time::timeout(
        PROBE_TIMEOUT,
        redis::cmd("PING").query_async::<String>(&mut kv),
    )
    .await;

    match ping {
        Ok(Ok(_)) => KvProbe {
            reachable: true,
            error: None,
        },
        Ok(Err(e)) => KvProbe {
            reachable: false,
            error: Some(e.to_string()),
        },
        Err(_) => KvProbe {
            reachable: false,
            error: Some(format!("no answer within {:?}", PROBE_TIMEOUT)),
        },
    }
}
