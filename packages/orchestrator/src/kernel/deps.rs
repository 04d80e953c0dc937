//! Service wiring (using traits for testability)
//!
//! Builds the domain services once at startup and hands them to the HTTP
//! layer and the supervisor. External services sit behind trait
//! abstractions so tests can inject stubs.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use sqlx::PgPool;

use sandbox::{CreateSandboxRequest, SandboxClient};

use crate::config::Config;
use crate::domains::locks::LockService;
use crate::domains::work_items::QueueManager;
use crate::domains::workers::{WorkerManager, WorkerManagerConfig};
use crate::kernel::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::kernel::traits::BaseSandboxRuntime;

// =============================================================================
// SandboxClient Adapter (implements BaseSandboxRuntime trait)
// =============================================================================

/// Wrapper around SandboxClient that implements the BaseSandboxRuntime trait
pub struct SandboxAdapter(pub SandboxClient);

impl SandboxAdapter {
    pub fn new(client: SandboxClient) -> Self {
        Self(client)
    }
}

#[async_trait]
impl BaseSandboxRuntime for SandboxAdapter {
    async fn create_sandbox(
        &self,
        image: &str,
        env: HashMap<String, String>,
        labels: HashMap<String, String>,
    ) -> Result<String> {
        let mut request = CreateSandboxRequest::image(image);
        request.env = env;
        request.labels = labels;

        let created = self.0.create_sandbox(&request).await?;
        Ok(created.id)
    }

    async fn stop_sandbox(&self, container_id: &str) -> Result<()> {
        self.0.stop_sandbox(container_id).await
    }
}

// =============================================================================
// Services
// =============================================================================

/// Shared domain services, cloned into handlers and the supervisor.
#[derive(Clone)]
pub struct Services {
    pub pool: PgPool,
    pub kv: ConnectionManager,
    pub queue: QueueManager,
    pub locks: LockService,
    pub rate: RateLimiter,
    pub workers: WorkerManager,
    pub config: Arc<Config>,
}

impl Services {
    /// Wire all domain services from infrastructure handles.
    pub fn build(
        config: Arc<Config>,
        pool: PgPool,
        kv: ConnectionManager,
        sandbox: Arc<dyn BaseSandboxRuntime>,
    ) -> Self {
        let queue = QueueManager::new(pool.clone());
        let locks = LockService::new(pool.clone());

        let rate = RateLimiter::new(
            pool.clone(),
            kv.clone(),
            RateLimiterConfig {
                key_prefix: config.rate_key_prefix.clone(),
                max_workers: config.max_workers,
                cooldown_seconds: config.cooldown_seconds,
                daily_budget: config.daily_budget,
            },
        );

        let workers = WorkerManager::new(
            pool.clone(),
            queue.clone(),
            locks.clone(),
            rate.clone(),
            sandbox,
            WorkerManagerConfig {
                stale_threshold_seconds: config.stale_threshold_seconds,
                max_retries: config.max_retries,
                execution_image: config.execution_image.clone(),
                verification_image: config.verification_image.clone(),
                orchestrator_base_url: config.orchestrator_base_url.clone(),
                worker_auth_token: config.worker_auth_token.clone(),
            },
        );

        Self {
            pool,
            kv,
            queue,
            locks,
            rate,
            workers,
            config,
        }
    }
}
