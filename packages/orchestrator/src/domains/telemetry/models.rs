//! Append-only telemetry: per-iteration metrics and free-form learnings.

use anyhow::Result;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// One iteration sample reported by a worker on completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub iteration: i32,
    #[serde(default)]
    pub tokens_in: i64,
    #[serde(default)]
    pub tokens_out: i64,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub files_modified: i32,
    #[serde(default)]
    pub tests_run: i32,
    #[serde(default)]
    pub tests_passed: i32,
    #[serde(default)]
    pub tests_failed: i32,
    #[serde(default)]
    pub test_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMetric {
    pub id: Uuid,
    pub worker_id: Uuid,
    pub work_item_id: Uuid,
    pub iteration: i32,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub duration_ms: i64,
    pub files_modified: i32,
    pub tests_run: i32,
    pub tests_passed: i32,
    pub tests_failed: i32,
    pub test_status: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries - ALL queries for worker_metrics live here
// =============================================================================

impl WorkerMetric {
    pub async fn insert(
        worker_id: Uuid,
        work_item_id: Uuid,
        sample: &MetricSample,
        pool: &PgPool,
    ) -> Result<Self> {
        let metric = sqlx::query_as::<_, WorkerMetric>(
            r#"
            INSERT INTO worker_metrics
                (worker_id, work_item_id, iteration, tokens_in, tokens_out,
                 duration_ms, files_modified, tests_run, tests_passed,
                 tests_failed, test_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(work_item_id)
        .bind(sample.iteration)
        .bind(sample.tokens_in)
        .bind(sample.tokens_out)
        .bind(sample.duration_ms)
        .bind(sample.files_modified)
        .bind(sample.tests_run)
        .bind(sample.tests_passed)
        .bind(sample.tests_failed)
        .bind(&sample.test_status)
        .fetch_one(pool)
        .await?;
        Ok(metric)
    }

    pub async fn list_for_work_item(work_item_id: Uuid, pool: &PgPool) -> Result<Vec<Self>> {
        let metrics = sqlx::query_as::<_, WorkerMetric>(
            r#"
            SELECT * FROM worker_metrics
            WHERE work_item_id = $1
            ORDER BY iteration ASC, created_at ASC
            "#,
        )
        .bind(work_item_id)
        .fetch_all(pool)
        .await?;
        Ok(metrics)
    }

    /// Most recent samples across the fleet.
    pub async fn recent(limit: i64, pool: &PgPool) -> Result<Vec<Self>> {
        let metrics = sqlx::query_as::<_, WorkerMetric>(
            "SELECT * FROM worker_metrics ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(metrics)
    }
}

/// Free-form text recorded when a worker finishes, used to seed future
/// prompts. The embedding is filled in by an external indexer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Learning {
    pub id: Uuid,
    pub worker_id: Uuid,
    pub work_item_id: Uuid,
    pub repo: String,
    pub spec: String,
    pub content: String,
    pub embedding: Option<Vector>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries - ALL queries for learnings live here
// =============================================================================

impl Learning {
    pub async fn insert(
        worker_id: Uuid,
        work_item_id: Uuid,
        repo: &str,
        spec: &str,
        content: &str,
        pool: &PgPool,
    ) -> Result<Self> {
        let learning = sqlx::query_as::<_, Learning>(
            r#"
            INSERT INTO learnings (worker_id, work_item_id, repo, spec, content)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(work_item_id)
        .bind(repo)
        .bind(spec)
        .bind(content)
        .fetch_one(pool)
        .await?;
        Ok(learning)
    }

    pub async fn recent(limit: i64, pool: &PgPool) -> Result<Vec<Self>> {
        let learnings = sqlx::query_as::<_, Learning>(
            "SELECT * FROM learnings ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(learnings)
    }
}
