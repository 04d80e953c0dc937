//! Worker lifecycle manager.
//!
//! Owns every worker transition and every sandbox termination. Terminal
//! transitions release all of the worker's locks and notify the rate
//! limiter exactly once; repeating a terminal call is a no-op that never
//! reopens the work item.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::{ApiError, ApiResult};
use crate::domains::locks::LockService;
use crate::domains::telemetry::{Learning, MetricSample, WorkerMetric};
use crate::domains::work_items::{QueueManager, WorkItem, WorkItemStatus, WorkItemType};
use crate::kernel::rate_limiter::RateLimiter;
use crate::kernel::traits::BaseSandboxRuntime;
use serde::Deserialize;

use super::models::{Worker, WorkerStats, WorkerStatus};

#[derive(Debug, Clone)]
pub struct WorkerManagerConfig {
    /// Workers silent for longer than this are considered stale.
    pub stale_threshold_seconds: i64,
    /// Requeue ceiling for failed/stuck/killed work items.
    pub max_retries: i32,
    pub execution_image: String,
    pub verification_image: String,
    /// Callback URL handed to the sandbox.
    pub orchestrator_base_url: String,
    pub worker_auth_token: Option<String>,
}

/// Final report a worker submits with `complete`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport {
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub metrics: Vec<MetricSample>,
    #[serde(default)]
    pub learnings: Vec<String>,
}

#[derive(Clone)]
pub struct WorkerManager {
    pool: PgPool,
    queue: QueueManager,
    locks: LockService,
    rate: RateLimiter,
    sandbox: Arc<dyn BaseSandboxRuntime>,
    config: WorkerManagerConfig,
}

impl WorkerManager {
    pub fn new(
        pool: PgPool,
        queue: QueueManager,
        locks: LockService,
        rate: RateLimiter,
        sandbox: Arc<dyn BaseSandboxRuntime>,
        config: WorkerManagerConfig,
    ) -> Self {
        Self {
            pool,
            queue,
            locks,
            rate,
            sandbox,
            config,
        }
    }

    /// Whether the rate limiter permits another spawn.
    pub async fn has_capacity(&self) -> ApiResult<bool> {
        self.rate.can_spawn_worker().await
    }

    /// Spawn a worker for an assigned work item: insert the worker row,
    /// record the spawn, start the sandbox, then write back the container
    /// id. A sandbox failure rolls the row back and requeues the item so
    /// nothing leaks.
    pub async fn spawn(&self, item: &WorkItem) -> ApiResult<Worker> {
        let worker = Worker::create(item.id, &self.pool)
            .await
            .map_err(ApiError::Internal)?;

        self.rate.record_spawn().await?;

        WorkItem::assign_worker(item.id, worker.id, &self.pool)
            .await
            .map_err(ApiError::Internal)?;

        let image = match item.item_type {
            WorkItemType::Execution => self.config.execution_image.clone(),
            WorkItemType::Verification => self.config.verification_image.clone(),
        };

        let work_item_json = serde_json::to_string(item)
            .map_err(|e| ApiError::Internal(e.into()))?;

        let mut env = HashMap::new();
        env.insert(
            "ORCHESTRATOR_URL".to_string(),
            self.config.orchestrator_base_url.clone(),
        );
        env.insert("WORKER_ID".to_string(), worker.id.to_string());
        env.insert("WORK_ITEM".to_string(), work_item_json);
        if let Some(token) = &self.config.worker_auth_token {
            env.insert("WORKER_AUTH_TOKEN".to_string(), token.clone());
        }

        let mut labels = HashMap::new();
        labels.insert("factory.worker-id".to_string(), worker.id.to_string());
        labels.insert("factory.work-item-id".to_string(), item.id.to_string());

        match self.sandbox.create_sandbox(&image, env, labels).await {
            Ok(container_id) => {
                Worker::set_container_id(worker.id, &container_id, &self.pool)
                    .await
                    .map_err(ApiError::Internal)?;

                info!(
                    worker_id = %worker.id,
                    work_item_id = %item.id,
                    container_id = %container_id,
                    image = %image,
                    "worker spawned"
                );

                Ok(Worker {
                    container_id: Some(container_id),
                    ..worker
                })
            }
            Err(e) => {
                // The worker row must not leak: drop it and put the item
                // back in the queue before surfacing the error.
                warn!(
                    worker_id = %worker.id,
                    work_item_id = %item.id,
                    error = %e,
                    "sandbox creation failed, rolling back spawn"
                );

                Worker::delete(worker.id, &self.pool)
                    .await
                    .map_err(ApiError::Internal)?;
                self.queue
                    .requeue(item.id, &format!("sandbox creation failed: {}", e))
                    .await?;

                Err(ApiError::Internal(e))
            }
        }
    }

    /// Registration callback from inside the sandbox. Reuses the active
    /// worker for the item when one exists; creates one otherwise.
    pub async fn register(&self, work_item_id: Uuid) -> ApiResult<(Worker, WorkItem)> {
        let item = self.queue.get(work_item_id).await?;

        if item.status.is_terminal() || item.status == WorkItemStatus::PendingGeneration {
            return Err(ApiError::invalid_state(format!(
                "work item is {:?} and cannot take a worker",
                item.status
            )));
        }

        if let Some(existing) = Worker::find_active_for_item(work_item_id, &self.pool)
            .await
            .map_err(ApiError::Internal)?
        {
            let worker = Worker::mark_running(existing.id, &self.pool)
                .await
                .map_err(ApiError::Internal)?
                .unwrap_or(existing);
            debug!(worker_id = %worker.id, work_item_id = %work_item_id, "worker registered (reused)");
            return Ok((worker, item));
        }

        let worker = Worker::create_registered(work_item_id, &self.pool)
            .await
            .map_err(ApiError::Internal)?;

        info!(worker_id = %worker.id, work_item_id = %work_item_id, "worker registered (created)");
        Ok((worker, item))
    }

    /// Heartbeat from an active worker. The first one moves the work item
    /// to in_progress; every one counts toward the daily budget. A
    /// terminal worker is rejected and never reanimated.
    pub async fn heartbeat(&self, worker_id: Uuid, iteration: i32) -> ApiResult<Worker> {
        if iteration < 0 {
            return Err(ApiError::validation("iteration must be non-negative"));
        }

        let Some(worker) = Worker::record_heartbeat(worker_id, iteration, &self.pool)
            .await
            .map_err(ApiError::Internal)?
        else {
            return Err(self.inactive_error(worker_id).await?);
        };

        WorkItem::mark_in_progress(worker.work_item_id, &self.pool)
            .await
            .map_err(ApiError::Internal)?;
        WorkItem::update_iteration(worker.work_item_id, iteration, &self.pool)
            .await
            .map_err(ApiError::Internal)?;

        self.rate.record_iteration().await?;

        Ok(worker)
    }

    /// Acquire locks on behalf of an active worker.
    pub async fn lock_files(
        &self,
        worker_id: Uuid,
        files: &[String],
    ) -> ApiResult<crate::domains::locks::LockOutcome> {
        self.require_active(worker_id).await?;
        self.locks.acquire_locks(worker_id, files).await
    }

    /// Release specific locks for an active worker.
    pub async fn unlock_files(&self, worker_id: Uuid, files: &[String]) -> ApiResult<u64> {
        self.require_active(worker_id).await?;
        self.locks.release_locks(worker_id, files).await
    }

    /// Worker finished successfully: terminal transition, work item
    /// completed, locks released, telemetry appended.
    pub async fn complete(&self, worker_id: Uuid, report: CompletionReport) -> ApiResult<Worker> {
        let Some(worker) =
            Worker::mark_terminal(worker_id, WorkerStatus::Completed, None, &self.pool)
                .await
                .map_err(ApiError::Internal)?
        else {
            return self.already_terminal(worker_id).await;
        };

        let item = self.queue.get(worker.work_item_id).await?;
        self.queue
            .complete(item.id, report.pr_url.as_deref())
            .await?;

        for sample in &report.metrics {
            WorkerMetric::insert(worker.id, item.id, sample, &self.pool)
                .await
                .map_err(ApiError::Internal)?;
        }
        for content in &report.learnings {
            Learning::insert(worker.id, item.id, &item.repo, &item.spec, content, &self.pool)
                .await
                .map_err(ApiError::Internal)?;
        }

        self.locks.release_all_locks(worker.id).await?;
        self.rate.record_worker_done();

        info!(
            worker_id = %worker.id,
            work_item_id = %item.id,
            pr_url = ?report.pr_url,
            "worker completed"
        );

        Ok(worker)
    }

    /// Worker reported a failure. The work item retries while both the
    /// iteration ceiling and the retry budget allow it.
    pub async fn fail(&self, worker_id: Uuid, error: &str, iteration: i32) -> ApiResult<Worker> {
        let Some(worker) =
            Worker::mark_terminal(worker_id, WorkerStatus::Failed, Some(error), &self.pool)
                .await
                .map_err(ApiError::Internal)?
        else {
            return self.already_terminal(worker_id).await;
        };

        let item = self.queue.get(worker.work_item_id).await?;
        if iteration < item.max_iterations && item.retry_count < self.config.max_retries {
            self.queue.requeue(item.id, error).await?;
        } else {
            self.queue.fail(item.id, error).await?;
        }

        self.locks.release_all_locks(worker.id).await?;
        self.rate.record_worker_done();

        warn!(
            worker_id = %worker.id,
            work_item_id = %item.id,
            iteration,
            error = %error,
            "worker failed"
        );

        Ok(worker)
    }

    /// Worker declared itself stuck and is abandoned.
    pub async fn stuck(&self, worker_id: Uuid, reason: &str, attempts: i32) -> ApiResult<Worker> {
        let Some(worker) =
            Worker::mark_terminal(worker_id, WorkerStatus::Stuck, Some(reason), &self.pool)
                .await
                .map_err(ApiError::Internal)?
        else {
            return self.already_terminal(worker_id).await;
        };

        let item = self.queue.get(worker.work_item_id).await?;
        if item.retry_count < self.config.max_retries {
            self.queue
                .requeue(item.id, &format!("worker stuck: {}", reason))
                .await?;
        } else {
            self.queue
                .fail(item.id, &format!("worker stuck: {}", reason))
                .await?;
        }

        self.locks.release_all_locks(worker.id).await?;
        self.rate.record_worker_done();

        warn!(
            worker_id = %worker.id,
            work_item_id = %item.id,
            attempts,
            reason = %reason,
            "worker stuck"
        );

        Ok(worker)
    }

    /// Force-terminate a worker. Stops the sandbox (best-effort; a missing
    /// container is fine) and performs the DB transitions regardless.
    pub async fn kill(&self, worker_id: Uuid, reason: &str) -> ApiResult<Worker> {
        let Some(existing) = Worker::find_by_id(worker_id, &self.pool)
            .await
            .map_err(ApiError::Internal)?
        else {
            return Err(ApiError::not_found("worker"));
        };

        if let Some(container_id) = &existing.container_id {
            if let Err(e) = self.sandbox.stop_sandbox(container_id).await {
                warn!(
                    worker_id = %worker_id,
                    container_id = %container_id,
                    error = %e,
                    "failed to stop sandbox, continuing with kill"
                );
            }
        }

        let Some(worker) =
            Worker::mark_terminal(worker_id, WorkerStatus::Killed, Some(reason), &self.pool)
                .await
                .map_err(ApiError::Internal)?
        else {
            // Already terminal; the stop above was still worth attempting.
            return Ok(existing);
        };

        let item = self.queue.get(worker.work_item_id).await?;
        let error = format!("worker killed: {}", reason);
        if item.retry_count < self.config.max_retries {
            self.queue.requeue(item.id, &error).await?;
        } else {
            self.queue.fail(item.id, &error).await?;
        }

        self.locks.release_all_locks(worker.id).await?;
        self.rate.record_worker_done();

        info!(worker_id = %worker.id, work_item_id = %item.id, reason = %reason, "worker killed");

        Ok(worker)
    }

    /// Active workers whose heartbeat has gone stale.
    pub async fn health_check(&self) -> ApiResult<Vec<Worker>> {
        Worker::find_stale(self.config.stale_threshold_seconds, &self.pool)
            .await
            .map_err(ApiError::Internal)
    }

    pub async fn list(&self) -> ApiResult<Vec<Worker>> {
        Worker::list(&self.pool).await.map_err(ApiError::Internal)
    }

    pub async fn get_stats(&self) -> ApiResult<WorkerStats> {
        Worker::stats(&self.pool).await.map_err(ApiError::Internal)
    }

    pub fn stale_threshold_seconds(&self) -> i64 {
        self.config.stale_threshold_seconds
    }

    /// Idempotence for repeated terminal calls: the worker exists but is
    /// already terminal, so return it unchanged; missing workers are 404.
    async fn already_terminal(&self, worker_id: Uuid) -> ApiResult<Worker> {
        match Worker::find_by_id(worker_id, &self.pool)
            .await
            .map_err(ApiError::Internal)?
        {
            Some(worker) => {
                debug!(
                    worker_id = %worker_id,
                    status = ?worker.status,
                    "terminal transition repeated, no-op"
                );
                Ok(worker)
            }
            None => Err(ApiError::not_found("worker")),
        }
    }

    async fn require_active(&self, worker_id: Uuid) -> ApiResult<Worker> {
        let Some(worker) = Worker::find_by_id(worker_id, &self.pool)
            .await
            .map_err(ApiError::Internal)?
        else {
            return Err(ApiError::not_found("worker"));
        };
        if !worker.status.is_active() {
            return Err(ApiError::invalid_state(format!(
                "worker is {:?} and no longer active",
                worker.status
            )));
        }
        Ok(worker)
    }

    async fn inactive_error(&self, worker_id: Uuid) -> ApiResult<ApiError> {
        Ok(
            match Worker::find_by_id(worker_id, &self.pool)
                .await
                .map_err(ApiError::Internal)?
            {
                Some(worker) => ApiError::invalid_state(format!(
                    "worker is {:?} and no longer active",
                    worker.status
                )),
                None => ApiError::not_found("worker"),
            },
        )
    }
}
