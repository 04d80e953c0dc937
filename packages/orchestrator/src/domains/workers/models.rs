//! Worker model: one sandboxed execution of an agent pursuing a work item.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "worker_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Stuck,
    Killed,
}

impl WorkerStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, WorkerStatus::Starting | WorkerStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub status: WorkerStatus,
    pub iteration: i32,
    pub last_heartbeat: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub container_id: Option<String>,
    pub error: Option<String>,
}

/// Fleet rollup by status.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub total: i64,
    pub starting: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub stuck: i64,
    pub killed: i64,
}

// =============================================================================
// SQL Queries - ALL queries for workers live here
// =============================================================================

impl Worker {
    /// Insert a new starting worker with a fresh heartbeat
    pub async fn create(work_item_id: Uuid, pool: &PgPool) -> Result<Self> {
        let worker = sqlx::query_as::<_, Worker>(
            r#"
            INSERT INTO workers (work_item_id, status, iteration, last_heartbeat)
            VALUES ($1, 'starting', 0, NOW())
            RETURNING *
            "#,
        )
        .bind(work_item_id)
        .fetch_one(pool)
        .await?;
        Ok(worker)
    }

    /// Insert a running worker and point its work item back at it, in one
    /// transaction. Used when a sandbox registers for an item that has no
    /// active worker yet.
    pub async fn create_registered(work_item_id: Uuid, pool: &PgPool) -> Result<Self> {
        let mut tx = pool.begin().await?;

        let worker = sqlx::query_as::<_, Worker>(
            r#"
            INSERT INTO workers (work_item_id, status, iteration, last_heartbeat)
            VALUES ($1, 'running', 0, NOW())
            RETURNING *
            "#,
        )
        .bind(work_item_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE work_items
            SET worker_id = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('queued', 'assigned', 'in_progress')
            "#,
        )
        .bind(work_item_id)
        .bind(worker.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(worker)
    }

    /// Find worker by ID
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let worker = sqlx::query_as::<_, Worker>("SELECT * FROM workers WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(worker)
    }

    /// The active (starting|running) worker for a work item, if any.
    /// The worker manager guarantees at most one exists.
    pub async fn find_active_for_item(work_item_id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let worker = sqlx::query_as::<_, Worker>(
            r#"
            SELECT * FROM workers
            WHERE work_item_id = $1 AND status IN ('starting', 'running')
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(work_item_id)
        .fetch_optional(pool)
        .await?;
        Ok(worker)
    }

    /// Record the sandbox id once the container exists.
    pub async fn set_container_id(id: Uuid, container_id: &str, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE workers SET container_id = $2 WHERE id = $1")
            .bind(id)
            .bind(container_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Remove a worker row that never got a container (spawn rollback).
    pub async fn delete(id: Uuid, pool: &PgPool) -> Result<()> {
        sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Bump an active worker to running (registration path).
    pub async fn mark_running(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let worker = sqlx::query_as::<_, Worker>(
            r#"
            UPDATE workers
            SET status = 'running', last_heartbeat = NOW()
            WHERE id = $1 AND status IN ('starting', 'running')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(worker)
    }

    /// Record a heartbeat. Returns None for missing or terminal workers;
    /// a terminal worker is never reanimated.
    pub async fn record_heartbeat(id: Uuid, iteration: i32, pool: &PgPool) -> Result<Option<Self>> {
        let worker = sqlx::query_as::<_, Worker>(
            r#"
            UPDATE workers
            SET status = 'running', last_heartbeat = NOW(), iteration = $2
            WHERE id = $1 AND status IN ('starting', 'running')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(iteration)
        .fetch_optional(pool)
        .await?;
        Ok(worker)
    }

    /// Move an active worker to a terminal status. Terminal statuses are
    /// sticky: a second call affects zero rows and returns None.
    pub async fn mark_terminal(
        id: Uuid,
        status: WorkerStatus,
        error: Option<&str>,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let worker = sqlx::query_as::<_, Worker>(
            r#"
            UPDATE workers
            SET status = $2, error = $3, completed_at = NOW()
            WHERE id = $1 AND status IN ('starting', 'running')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .fetch_optional(pool)
        .await?;
        Ok(worker)
    }

    /// Active workers whose heartbeat is older than the stale threshold.
    pub async fn find_stale(threshold_seconds: i64, pool: &PgPool) -> Result<Vec<Self>> {
        let workers = sqlx::query_as::<_, Worker>(
            r#"
            SELECT * FROM workers
            WHERE status IN ('starting', 'running')
              AND last_heartbeat < NOW() - ($1 || ' seconds')::INTERVAL
            ORDER BY last_heartbeat ASC
            "#,
        )
        .bind(threshold_seconds.to_string())
        .fetch_all(pool)
        .await?;
        Ok(workers)
    }

    /// All workers, newest first.
    pub async fn list(pool: &PgPool) -> Result<Vec<Self>> {
        let workers =
            sqlx::query_as::<_, Worker>("SELECT * FROM workers ORDER BY started_at DESC")
                .fetch_all(pool)
                .await?;
        Ok(workers)
    }

    /// Count of active workers, always read from the canonical table.
    pub async fn count_active(pool: &PgPool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM workers WHERE status IN ('starting', 'running')",
        )
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    /// Status rollup for the stats endpoint.
    pub async fn stats(pool: &PgPool) -> Result<WorkerStats> {
        let rows = sqlx::query_as::<_, (WorkerStatus, i64)>(
            "SELECT status, COUNT(*) FROM workers GROUP BY status",
        )
        .fetch_all(pool)
        .await?;

        let mut stats = WorkerStats::default();
        for (status, count) in rows {
            stats.total += count;
            match status {
                WorkerStatus::Starting => stats.starting = count,
                WorkerStatus::Running => stats.running = count,
                WorkerStatus::Completed => stats.completed = count,
                WorkerStatus::Failed => stats.failed = count,
                WorkerStatus::Stuck => stats.stuck = count,
                WorkerStatus::Killed => stats.killed = count,
            }
        }
        Ok(stats)
    }
}
