//! Read-side rollups over persisted worker runs. No cache: every request
//! aggregates directly so dashboards never see drift.

use anyhow::Result;
use serde::Serialize;
use sqlx::PgPool;

/// Fleet snapshot for the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryMetrics {
    pub active_workers: i64,
    pub queued_items: i64,
    pub completed_today: i64,
    pub failed_today: i64,
    pub iterations_today: i64,
    pub daily_budget: i64,
    /// Mean seconds from creation to completion for items finished today.
    pub avg_completion_time: Option<f64>,
    /// Completed over completed+failed for today; 1.0 when nothing ran.
    pub success_rate: f64,
}

#[derive(sqlx::FromRow)]
struct DayRollup {
    active_workers: i64,
    queued_items: i64,
    completed_today: i64,
    failed_today: i64,
    avg_completion_seconds: Option<f64>,
}

impl FactoryMetrics {
    /// Aggregate the persisted tables; the rate limiter contributes the
    /// KV-backed budget figures.
    pub async fn compute(iterations_today: i64, daily_budget: i64, pool: &PgPool) -> Result<Self> {
        let rollup = sqlx::query_as::<_, DayRollup>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM workers
                  WHERE status IN ('starting', 'running'))            AS active_workers,
                (SELECT COUNT(*) FROM work_items
                  WHERE status = 'queued')                            AS queued_items,
                (SELECT COUNT(*) FROM work_items
                  WHERE status = 'completed'
                    AND completed_at >= date_trunc('day', NOW()))     AS completed_today,
                (SELECT COUNT(*) FROM work_items
                  WHERE status = 'failed'
                    AND completed_at >= date_trunc('day', NOW()))     AS failed_today,
                (SELECT AVG(EXTRACT(EPOCH FROM (completed_at - created_at)))::float8
                   FROM work_items
                  WHERE status = 'completed'
                    AND completed_at >= date_trunc('day', NOW()))     AS avg_completion_seconds
            "#,
        )
        .fetch_one(pool)
        .await?;

        let finished = rollup.completed_today + rollup.failed_today;
        let success_rate = if finished == 0 {
            1.0
        } else {
            rollup.completed_today as f64 / finished as f64
        };

        Ok(Self {
            active_workers: rollup.active_workers,
            queued_items: rollup.queued_items,
            completed_today: rollup.completed_today,
            failed_today: rollup.failed_today,
            iterations_today,
            daily_budget,
            avg_completion_time: rollup.avg_completion_seconds,
            success_rate,
        })
    }
}
