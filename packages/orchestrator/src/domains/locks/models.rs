//! File lock rows. The `UNIQUE(file_path)` constraint is the
//! mutual-exclusion primitive; everything else is bookkeeping.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FileLock {
    pub id: Uuid,
    pub worker_id: Uuid,
    pub file_path: String,
    pub acquired_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries - ALL queries for file_locks live here
// =============================================================================

impl FileLock {
    /// Attempt to take the lock for a path. A conflicting row makes the
    /// insert do nothing and this returns None; the caller reads the
    /// holder to decide between idempotent re-acquisition and a block.
    pub async fn try_insert(worker_id: Uuid, file_path: &str, pool: &PgPool) -> Result<Option<Self>> {
        let lock = sqlx::query_as::<_, FileLock>(
            r#"
            INSERT INTO file_locks (worker_id, file_path)
            VALUES ($1, $2)
            ON CONFLICT (file_path) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(file_path)
        .fetch_optional(pool)
        .await?;
        Ok(lock)
    }

    /// Current holder of a path, if any.
    pub async fn find_by_path(file_path: &str, pool: &PgPool) -> Result<Option<Self>> {
        let lock = sqlx::query_as::<_, FileLock>("SELECT * FROM file_locks WHERE file_path = $1")
            .bind(file_path)
            .fetch_optional(pool)
            .await?;
        Ok(lock)
    }

    /// Release the given paths, but only rows owned by this worker.
    pub async fn delete_for_worker_paths(
        worker_id: Uuid,
        file_paths: &[String],
        pool: &PgPool,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM file_locks WHERE worker_id = $1 AND file_path = ANY($2)",
        )
        .bind(worker_id)
        .bind(file_paths)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Release everything the worker holds.
    pub async fn delete_all_for_worker(worker_id: Uuid, pool: &PgPool) -> Result<u64> {
        let result = sqlx::query("DELETE FROM file_locks WHERE worker_id = $1")
            .bind(worker_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// All locks held by a worker.
    pub async fn list_for_worker(worker_id: Uuid, pool: &PgPool) -> Result<Vec<Self>> {
        let locks = sqlx::query_as::<_, FileLock>(
            "SELECT * FROM file_locks WHERE worker_id = $1 ORDER BY acquired_at ASC",
        )
        .bind(worker_id)
        .fetch_all(pool)
        .await?;
        Ok(locks)
    }
}
