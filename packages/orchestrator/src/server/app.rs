//! Application setup and router assembly.

use axum::{
    extract::Extension,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::Services;
use crate::server::routes::{
    add_work_handler, cancel_work_handler, complete_handler, fail_handler, get_work_handler,
    health_handler, heartbeat_handler, kill_worker_handler, list_work_handler,
    list_workers_handler, lock_handler, metrics_handler, queue_handler, register_handler,
    spec_writeback_handler, status_handler, stuck_handler, unlock_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

/// Build the Axum application router
pub fn build_app(services: Services) -> Router {
    let app_state = AppState { services };

    // CORS: dashboards are read-only views served from other origins.
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    Router::new()
        // Worker-facing endpoints (called from the sandbox)
        .route("/api/worker/register", post(register_handler))
        .route("/api/worker/:id/heartbeat", post(heartbeat_handler))
        .route("/api/worker/:id/lock", post(lock_handler))
        .route("/api/worker/:id/unlock", post(unlock_handler))
        .route("/api/worker/:id/complete", post(complete_handler))
        .route("/api/worker/:id/fail", post(fail_handler))
        .route("/api/worker/:id/stuck", post(stuck_handler))
        // Operator-facing endpoints
        .route("/api/work", post(add_work_handler).get(list_work_handler))
        .route("/api/work/:id", get(get_work_handler))
        .route("/api/work/:id/cancel", post(cancel_work_handler))
        .route("/api/work/:id/spec", post(spec_writeback_handler))
        .route("/api/workers", get(list_workers_handler))
        .route("/api/workers/:id/kill", post(kill_worker_handler))
        .route("/api/queue", get(queue_handler))
        .route("/api/metrics", get(metrics_handler))
        .route("/api/status", get(status_handler))
        // Health check
        .route("/health", get(health_handler))
        .layer(Extension(app_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
