//! Work item model for queued code-change work.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "work_item_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    PendingGeneration,
    #[default]
    Queued,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl WorkItemStatus {
    /// Terminal statuses are sticky; nothing transitions out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkItemStatus::Completed | WorkItemStatus::Failed | WorkItemStatus::Cancelled
        )
    }
}

/// Priority declaration order matches the Postgres enum, so
/// `ORDER BY priority DESC` dispatches critical first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "work_item_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkItemPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "work_item_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkItemType {
    #[default]
    Execution,
    Verification,
}

// ============================================================================
// Work Item Model
// ============================================================================

/// A unit of code-change work described by a spec.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: Uuid,
    pub repo: String,
    pub branch: String,
    pub spec: String,
    pub description: Option<String>,
    pub priority: WorkItemPriority,
    pub status: WorkItemStatus,
    pub worker_id: Option<Uuid>,
    pub iteration: i32,
    pub max_iterations: i32,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub pr_url: Option<String>,
    pub metadata: serde_json::Value,
    #[serde(rename = "type")]
    pub item_type: WorkItemType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Insert arguments for a new work item. Defaults are applied by the
/// queue manager, not here.
#[derive(Debug, Clone)]
pub struct NewWorkItem {
    pub repo: String,
    pub branch: String,
    pub spec: String,
    pub description: Option<String>,
    pub priority: WorkItemPriority,
    pub status: WorkItemStatus,
    pub max_iterations: i32,
    pub metadata: serde_json::Value,
    pub item_type: WorkItemType,
}

// =============================================================================
// SQL Queries - ALL queries for work_items live here
// =============================================================================

impl WorkItem {
    /// Insert a new work item
    pub async fn create(new: NewWorkItem, pool: &PgPool) -> Result<Self> {
        let item = sqlx::query_as::<_, WorkItem>(
            r#"
            INSERT INTO work_items
                (repo, branch, spec, description, priority, status,
                 max_iterations, metadata, item_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(&new.repo)
        .bind(&new.branch)
        .bind(&new.spec)
        .bind(&new.description)
        .bind(new.priority)
        .bind(new.status)
        .bind(new.max_iterations)
        .bind(&new.metadata)
        .bind(new.item_type)
        .fetch_one(pool)
        .await?;
        Ok(item)
    }

    /// Find a work item by ID
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let item = sqlx::query_as::<_, WorkItem>("SELECT * FROM work_items WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(item)
    }

    /// List all work items, highest priority first, oldest first within
    /// a priority band.
    pub async fn list(pool: &PgPool) -> Result<Vec<Self>> {
        let items = sqlx::query_as::<_, WorkItem>(
            r#"
            SELECT * FROM work_items
            ORDER BY priority DESC, created_at ASC, id ASC
            "#,
        )
        .fetch_all(pool)
        .await?;
        Ok(items)
    }

    /// List work items with a given status, same ordering as `list`.
    pub async fn list_with_status(status: WorkItemStatus, pool: &PgPool) -> Result<Vec<Self>> {
        let items = sqlx::query_as::<_, WorkItem>(
            r#"
            SELECT * FROM work_items
            WHERE status = $1
            ORDER BY priority DESC, created_at ASC, id ASC
            "#,
        )
        .bind(status)
        .fetch_all(pool)
        .await?;
        Ok(items)
    }

    /// Atomically claim the next dispatchable item and move it to `assigned`.
    ///
    /// Selection and status update are one statement so concurrent loops
    /// can never double-dispatch; SKIP LOCKED makes racers fall through to
    /// the next row. Items waiting out a retry backoff are not eligible.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<Self>> {
        let item = sqlx::query_as::<_, WorkItem>(
            r#"
            UPDATE work_items
            SET status = 'assigned', updated_at = NOW()
            WHERE id = (
                SELECT id
                FROM work_items
                WHERE status = 'queued'
                  AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .fetch_optional(pool)
        .await?;
        Ok(item)
    }

    /// Attach the spawned worker to an assigned item.
    pub async fn assign_worker(id: Uuid, worker_id: Uuid, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET worker_id = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'assigned'
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// First heartbeat moves an assigned item to in_progress.
    pub async fn mark_in_progress(id: Uuid, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET status = 'in_progress', updated_at = NOW()
            WHERE id = $1 AND status = 'assigned'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record the latest reported iteration.
    pub async fn update_iteration(id: Uuid, iteration: i32, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE work_items
            SET iteration = LEAST($2, max_iterations), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(iteration)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Return a dispatched item to the queue for another attempt.
    ///
    /// Clears the worker back-reference and schedules the retry; the guard
    /// keeps already-terminal items untouched.
    pub async fn requeue(
        id: Uuid,
        reason: &str,
        next_retry_at: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET status = 'queued',
                worker_id = NULL,
                retry_count = retry_count + 1,
                next_retry_at = $3,
                error = $2,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('assigned', 'in_progress')
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(next_retry_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Terminal success.
    pub async fn complete(id: Uuid, pr_url: Option<&str>, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET status = 'completed',
                pr_url = $2,
                error = NULL,
                worker_id = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('assigned', 'in_progress')
            "#,
        )
        .bind(id)
        .bind(pr_url)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Terminal failure with the last human-readable error.
    pub async fn fail(id: Uuid, error: &str, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET status = 'failed',
                error = $2,
                worker_id = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('queued', 'assigned', 'in_progress')
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Cancel a pre-dispatch item. Only `queued` items are cancellable.
    pub async fn cancel(id: Uuid, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET status = 'cancelled',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'queued'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Spec-generation writeback: spec and branch land together and the
    /// item becomes dispatchable, all in one statement.
    pub async fn attach_spec(id: Uuid, spec: &str, branch: &str, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET spec = $2,
                branch = $3,
                status = 'queued',
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending_generation'
            "#,
        )
        .bind(id)
        .bind(spec)
        .bind(branch)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count items with a given status.
    pub async fn count_with_status(status: WorkItemStatus, pool: &PgPool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM work_items WHERE status = $1",
        )
        .bind(status)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(WorkItemStatus::Completed.is_terminal());
        assert!(WorkItemStatus::Failed.is_terminal());
        assert!(WorkItemStatus::Cancelled.is_terminal());
        assert!(!WorkItemStatus::Queued.is_terminal());
        assert!(!WorkItemStatus::Assigned.is_terminal());
        assert!(!WorkItemStatus::InProgress.is_terminal());
        assert!(!WorkItemStatus::PendingGeneration.is_terminal());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&WorkItemStatus::InProgress).unwrap();
        assert_eq!(json, r#""in_progress""#);
        let json = serde_json::to_string(&WorkItemStatus::PendingGeneration).unwrap();
        assert_eq!(json, r#""pending_generation""#);
    }

    #[test]
    fn test_priority_round_trips() {
        for (text, priority) in [
            (r#""low""#, WorkItemPriority::Low),
            (r#""medium""#, WorkItemPriority::Medium),
            (r#""high""#, WorkItemPriority::High),
            (r#""critical""#, WorkItemPriority::Critical),
        ] {
            let parsed: WorkItemPriority = serde_json::from_str(text).unwrap();
            assert_eq!(parsed, priority);
        }
    }
}
