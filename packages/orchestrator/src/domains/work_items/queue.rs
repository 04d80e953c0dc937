//! Queue manager: work-item ingress and status transitions.
//!
//! All transitions are single guarded UPDATE statements in the model; this
//! layer adds validation, defaults and retry backoff. Dispatch order is
//! priority first, FIFO within a priority band.

use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::common::backoff::retry_delay;
use crate::common::{ApiError, ApiResult};

use super::models::{NewWorkItem, WorkItem, WorkItemPriority, WorkItemStatus, WorkItemType};

/// Default attempt ceiling for a work item.
const DEFAULT_MAX_ITERATIONS: i32 = 10;

/// Request body for adding a work item.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddWorkItemRequest {
    pub repo: String,
    #[serde(default)]
    pub spec: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub priority: Option<WorkItemPriority>,
    #[serde(default)]
    pub max_iterations: Option<i32>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(rename = "type", default)]
    pub item_type: Option<WorkItemType>,
}

/// Work-item ingress and queue state machine.
#[derive(Clone)]
pub struct QueueManager {
    pool: PgPool,
}

impl QueueManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new work item.
    ///
    /// With a spec the item is immediately `queued`; with only a description
    /// it is parked as `pending_generation` until the spec generator calls
    /// [`QueueManager::attach_generated_spec`].
    pub async fn add(&self, request: AddWorkItemRequest) -> ApiResult<WorkItem> {
        let repo = request.repo.trim().to_string();
        if repo.is_empty() {
            return Err(ApiError::validation("repo is required"));
        }
        if !repo.contains('/') || repo.starts_with('/') || repo.ends_with('/') {
            return Err(ApiError::validation("repo must be in owner/name form"));
        }

        let spec = request.spec.unwrap_or_default();
        let description = request.description.filter(|d| !d.trim().is_empty());
        if spec.trim().is_empty() && description.is_none() {
            return Err(ApiError::validation("either spec or description is required"));
        }

        let max_iterations = request.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        if max_iterations <= 0 {
            return Err(ApiError::validation("maxIterations must be positive"));
        }

        let status = if spec.trim().is_empty() {
            WorkItemStatus::PendingGeneration
        } else {
            WorkItemStatus::Queued
        };

        let branch = request
            .branch
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(default_branch);

        let item = WorkItem::create(
            NewWorkItem {
                repo,
                branch,
                spec,
                description,
                priority: request.priority.unwrap_or_default(),
                status,
                max_iterations,
                metadata: request.metadata.unwrap_or_else(|| serde_json::json!({})),
                item_type: request.item_type.unwrap_or_default(),
            },
            &self.pool,
        )
        .await
        .map_err(ApiError::Internal)?;

        info!(
            work_item_id = %item.id,
            repo = %item.repo,
            status = ?item.status,
            "work item added"
        );

        Ok(item)
    }

    /// Fetch a work item by id.
    pub async fn get(&self, id: Uuid) -> ApiResult<WorkItem> {
        WorkItem::find_by_id(id, &self.pool)
            .await
            .map_err(ApiError::Internal)?
            .ok_or_else(|| ApiError::not_found("work item"))
    }

    /// List work items, optionally filtered by status.
    pub async fn list(&self, status: Option<WorkItemStatus>) -> ApiResult<Vec<WorkItem>> {
        let items = match status {
            Some(status) => WorkItem::list_with_status(status, &self.pool).await,
            None => WorkItem::list(&self.pool).await,
        }
        .map_err(ApiError::Internal)?;
        Ok(items)
    }

    /// Cancel a queued item. Dispatched items must be killed via their
    /// worker instead.
    pub async fn cancel(&self, id: Uuid) -> ApiResult<WorkItem> {
        if WorkItem::cancel(id, &self.pool).await.map_err(ApiError::Internal)? {
            info!(work_item_id = %id, "work item cancelled");
            return self.get(id).await;
        }

        // Distinguish missing from non-cancellable.
        let item = self.get(id).await?;
        Err(ApiError::invalid_state(format!(
            "work item is {:?} and cannot be cancelled; kill its worker instead",
            item.status
        )))
    }

    /// Claim the next dispatchable item, transitioning it to `assigned`.
    ///
    /// Safe under concurrent callers; see `WorkItem::claim_next`.
    pub async fn get_next(&self) -> ApiResult<Option<WorkItem>> {
        let item = WorkItem::claim_next(&self.pool)
            .await
            .map_err(ApiError::Internal)?;
        if let Some(item) = &item {
            info!(
                work_item_id = %item.id,
                priority = ?item.priority,
                "work item assigned"
            );
        }
        Ok(item)
    }

    /// Return a dispatched item to the queue with exponential backoff.
    pub async fn requeue(&self, id: Uuid, reason: &str) -> ApiResult<bool> {
        let item = self.get(id).await?;

        // Delay for the attempt we are about to schedule.
        let delay = retry_delay(item.retry_count + 1);
        let next_retry_at = chrono::Utc::now() + delay;

        let requeued = WorkItem::requeue(id, reason, next_retry_at, &self.pool)
            .await
            .map_err(ApiError::Internal)?;

        if requeued {
            info!(
                work_item_id = %id,
                retry_count = item.retry_count + 1,
                next_retry_at = %next_retry_at,
                reason = %reason,
                "work item requeued"
            );
        }

        Ok(requeued)
    }

    /// Terminal success. Idempotent: a second call is a no-op.
    pub async fn complete(&self, id: Uuid, pr_url: Option<&str>) -> ApiResult<bool> {
        let completed = WorkItem::complete(id, pr_url, &self.pool)
            .await
            .map_err(ApiError::Internal)?;
        if completed {
            info!(work_item_id = %id, pr_url = ?pr_url, "work item completed");
        }
        Ok(completed)
    }

    /// Terminal failure. Idempotent: a second call is a no-op.
    pub async fn fail(&self, id: Uuid, error: &str) -> ApiResult<bool> {
        let failed = WorkItem::fail(id, error, &self.pool)
            .await
            .map_err(ApiError::Internal)?;
        if failed {
            info!(work_item_id = %id, error = %error, "work item failed");
        }
        Ok(failed)
    }

    /// Spec-generation writeback: spec + branch land and the item becomes
    /// `queued` in a single update.
    pub async fn attach_generated_spec(
        &self,
        id: Uuid,
        spec: &str,
        branch: &str,
    ) -> ApiResult<WorkItem> {
        if spec.trim().is_empty() {
            return Err(ApiError::validation("spec must not be empty"));
        }
        if branch.trim().is_empty() {
            return Err(ApiError::validation("branch must not be empty"));
        }

        if WorkItem::attach_spec(id, spec, branch, &self.pool)
            .await
            .map_err(ApiError::Internal)?
        {
            info!(work_item_id = %id, branch = %branch, "generated spec attached");
            return self.get(id).await;
        }

        let item = self.get(id).await?;
        Err(ApiError::invalid_state(format!(
            "work item is {:?}, not pending_generation",
            item.status
        )))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Default target branch when the caller does not pick one.
fn default_branch() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("factory/{}", &suffix[..8])
}
