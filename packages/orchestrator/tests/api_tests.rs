//! Integration tests for the REST surface: status codes, the error
//! envelope, and the worker callback lifecycle end to end.

mod common;

use crate::common::TestHarness;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use orchestrator_core::server::build_app;
use serde_json::{json, Value};
use test_context::test_context;
use tower::ServiceExt;
use uuid::Uuid;

fn app(ctx: &TestHarness) -> Router {
    build_app(ctx.services.clone())
}

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            builder.body(Body::from(value.to_string())).unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

// =============================================================================
// Work endpoints
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn test_add_work_returns_201_with_id_and_status(ctx: &mut TestHarness) {
    let (status, body) = send(
        app(ctx),
        Method::POST,
        "/api/work",
        Some(json!({ "repo": "octo/site", "spec": "do X", "priority": "medium" })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "queued");
    let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();

    let (status, body) = send(app(ctx), Method::GET, &format!("/api/work/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["repo"], "octo/site");
    assert_eq!(body["spec"], "do X");
    assert_eq!(body["type"], "execution");
    assert_eq!(body["maxIterations"], 10);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_validation_error_envelope(ctx: &mut TestHarness) {
    // Semantically invalid: no spec and no description.
    let (status, body) = send(
        app(ctx),
        Method::POST,
        "/api/work",
        Some(json!({ "repo": "octo/site" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["error"].as_str().is_some());

    // Malformed body gets the same envelope.
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/work")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app(ctx).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_not_found_envelope(ctx: &mut TestHarness) {
    let (status, body) = send(
        app(ctx),
        Method::GET,
        &format!("/api/work/{}", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_cancel_in_progress_is_an_invalid_state(ctx: &mut TestHarness) {
    let item = ctx.add_assigned_item("running work").await;
    let worker = ctx.register_worker(item.id).await;
    ctx.services.workers.heartbeat(worker.id, 1).await.unwrap();

    let (status, body) = send(
        app(ctx),
        Method::POST,
        &format!("/api/work/{}/cancel", item.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_STATE");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_spec_writeback_endpoint(ctx: &mut TestHarness) {
    let (_, body) = send(
        app(ctx),
        Method::POST,
        "/api/work",
        Some(json!({ "repo": "octo/site", "description": "speed up the dashboard" })),
    )
    .await;
    assert_eq!(body["status"], "pending_generation");
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        app(ctx),
        Method::POST,
        &format!("/api/work/{}/spec", id),
        Some(json!({ "spec": "generated spec", "branch": "factory/speedup" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "queued");
}

// =============================================================================
// Worker endpoints
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn test_worker_lifecycle_over_http(ctx: &mut TestHarness) {
    let item = ctx.add_assigned_item("http lifecycle").await;

    // register → 201 {workerId, workItem}
    let (status, body) = send(
        app(ctx),
        Method::POST,
        "/api/worker/register",
        Some(json!({ "workItemId": item.id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let worker_id = body["workerId"].as_str().unwrap().to_string();
    assert_eq!(body["workItem"]["id"], json!(item.id));

    // heartbeat → 200 {success:true}
    let (status, body) = send(
        app(ctx),
        Method::POST,
        &format!("/api/worker/{}/heartbeat", worker_id),
        Some(json!({ "iteration": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    // lock → 200 {acquired:true}
    let file = format!("src/{}.rs", Uuid::new_v4().simple());
    let (status, body) = send(
        app(ctx),
        Method::POST,
        &format!("/api/worker/{}/lock", worker_id),
        Some(json!({ "files": [file] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["acquired"], true);

    // complete → 200; work item completed with the PR URL, locks gone.
    let (status, body) = send(
        app(ctx),
        Method::POST,
        &format!("/api/worker/{}/complete", worker_id),
        Some(json!({ "prUrl": "https://github.com/octo/site/pull/42" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, body) = send(app(ctx), Method::GET, &format!("/api/work/{}", item.id), None).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["prUrl"], "https://github.com/octo/site/pull/42");

    let worker_uuid: Uuid = worker_id.parse().unwrap();
    assert!(ctx
        .services
        .locks
        .get_locks_for_worker(worker_uuid)
        .await
        .unwrap()
        .is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_lock_contention_over_http(ctx: &mut TestHarness) {
    let item1 = ctx.add_assigned_item("contender one").await;
    let item2 = ctx.add_assigned_item("contender two").await;
    let w1 = ctx.register_worker(item1.id).await;
    let w2 = ctx.register_worker(item2.id).await;

    let a = format!("src/{}.rs", Uuid::new_v4().simple());
    let b = format!("src/{}.rs", Uuid::new_v4().simple());
    let c = format!("src/{}.rs", Uuid::new_v4().simple());

    let (_, body) = send(
        app(ctx),
        Method::POST,
        &format!("/api/worker/{}/lock", w1.id),
        Some(json!({ "files": [a.clone(), b.clone()] })),
    )
    .await;
    assert_eq!(body["acquired"], true);

    let (status, body) = send(
        app(ctx),
        Method::POST,
        &format!("/api/worker/{}/lock", w2.id),
        Some(json!({ "files": [b.clone(), c.clone()] })),
    )
    .await;
    // Contention is not an error status.
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["acquired"], false);
    assert_eq!(body["blockedFiles"], json!([b]));
    assert_eq!(body["lockedFiles"], json!([c]));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_heartbeat_for_unknown_worker_is_404(ctx: &mut TestHarness) {
    let (status, body) = send(
        app(ctx),
        Method::POST,
        &format!("/api/worker/{}/heartbeat", Uuid::new_v4()),
        Some(json!({ "iteration": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_kill_endpoint_terminates_worker(ctx: &mut TestHarness) {
    let item = ctx.add_assigned_item("to be killed").await;
    let item = ctx.services.queue.get(item.id).await.unwrap();
    let worker = ctx.services.workers.spawn(&item).await.unwrap();

    let (status, body) = send(
        app(ctx),
        Method::POST,
        &format!("/api/workers/{}/kill", worker.id),
        Some(json!({ "reason": "wedged" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "killed");

    assert!(ctx
        .sandbox
        .stopped()
        .contains(&worker.container_id.unwrap()));
}

// =============================================================================
// Read-only rollups
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn test_status_endpoint_reports_gate_health(ctx: &mut TestHarness) {
    let (status, body) = send(app(ctx), Method::GET, "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    // Harness config has a huge budget and no cooldown.
    assert_eq!(body["status"], "healthy");
    assert!(body["rate"]["maxWorkers"].is_i64() || body["rate"]["maxWorkers"].is_u64());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_metrics_endpoint_shape(ctx: &mut TestHarness) {
    let (status, body) = send(app(ctx), Method::GET, "/api/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    for field in [
        "activeWorkers",
        "queuedItems",
        "completedToday",
        "failedToday",
        "iterationsToday",
        "dailyBudget",
        "successRate",
    ] {
        assert!(!body[field].is_null(), "missing {}", field);
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_workers_and_queue_listings(ctx: &mut TestHarness) {
    let item = ctx.add_assigned_item("listed work").await;
    let worker = ctx.register_worker(item.id).await;

    let (status, body) = send(app(ctx), Method::GET, "/api/workers", None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["workers"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|w| w["id"].as_str())
        .collect();
    assert!(ids.contains(&worker.id.to_string().as_str()));
    assert!(body["stats"]["total"].as_i64().unwrap() >= 1);

    let (status, body) = send(app(ctx), Method::GET, "/api/queue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["items"].is_array());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_health_endpoint(ctx: &mut TestHarness) {
    let (status, body) = send(app(ctx), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"]["reachable"], true);
    assert!(body["store"]["queuedItems"].is_i64() || body["store"]["queuedItems"].is_u64());
    assert_eq!(body["kv"]["reachable"], true);
}
