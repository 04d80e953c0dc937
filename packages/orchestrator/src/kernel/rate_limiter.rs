//! Fleet-wide spawn rate limiter.
//!
//! Three independent gates, all of which must pass before a spawn:
//! fleet capacity, spawn cooldown, and the daily iteration budget.
//! Capacity is always derived from the workers table; a separately
//! maintained counter drifts across crashes and kill paths. Cooldown and
//! budget live in Redis so increments stay atomic across handlers.

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::common::ApiResult;
use crate::domains::workers::Worker;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Namespace for KV keys, e.g. `factory`.
    pub key_prefix: String,
    pub max_workers: i64,
    pub cooldown_seconds: i64,
    pub daily_budget: i64,
}

/// Snapshot of every gate, used by `canSpawnWorker` and the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateStatus {
    pub active_workers: i64,
    pub max_workers: i64,
    pub cooldown_seconds: i64,
    pub seconds_since_last_spawn: Option<i64>,
    pub iterations_today: i64,
    pub daily_budget: i64,
    pub capacity_ok: bool,
    pub cooldown_ok: bool,
    pub budget_ok: bool,
    pub can_spawn: bool,
}

#[derive(Clone)]
pub struct RateLimiter {
    pool: PgPool,
    kv: ConnectionManager,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(pool: PgPool, kv: ConnectionManager, config: RateLimiterConfig) -> Self {
        Self { pool, kv, config }
    }

    fn last_spawn_key(&self) -> String {
        format!("{}:rate:last_spawn", self.config.key_prefix)
    }

    fn iterations_key(&self) -> String {
        format!("{}:rate:daily_iterations", self.config.key_prefix)
    }

    fn reset_date_key(&self) -> String {
        format!("{}:rate:daily_reset_date", self.config.key_prefix)
    }

    fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    /// Reset the daily counter when the stored date is not today, and
    /// return the current count. Called before every budget read or
    /// increment so the first operation after midnight rolls the window.
    async fn iterations_today(&self) -> ApiResult<i64> {
        let mut kv = self.kv.clone();
        let today = Self::today();

        let stored_date: Option<String> = kv.get(self.reset_date_key()).await?;
        if stored_date.as_deref() != Some(today.as_str()) {
            let _: () = kv.set(self.iterations_key(), 0i64).await?;
            let _: () = kv.set(self.reset_date_key(), &today).await?;
            info!(date = %today, "daily iteration budget reset");
            return Ok(0);
        }

        let count: Option<i64> = kv.get(self.iterations_key()).await?;
        Ok(count.unwrap_or(0))
    }

    /// Full gate snapshot.
    pub async fn get_status(&self) -> ApiResult<RateStatus> {
        let active_workers = Worker::count_active(&self.pool)
            .await
            .map_err(crate::common::ApiError::Internal)?;
        let capacity_ok = active_workers < self.config.max_workers;

        let mut kv = self.kv.clone();
        let last_spawn_ms: Option<i64> = kv.get(self.last_spawn_key()).await?;
        let seconds_since_last_spawn =
            last_spawn_ms.map(|ms| (Utc::now().timestamp_millis() - ms) / 1000);
        let cooldown_ok = match seconds_since_last_spawn {
            Some(elapsed) => elapsed >= self.config.cooldown_seconds,
            None => true,
        };

        let iterations_today = self.iterations_today().await?;
        let budget_ok = iterations_today < self.config.daily_budget;

        Ok(RateStatus {
            active_workers,
            max_workers: self.config.max_workers,
            cooldown_seconds: self.config.cooldown_seconds,
            seconds_since_last_spawn,
            iterations_today,
            daily_budget: self.config.daily_budget,
            capacity_ok,
            cooldown_ok,
            budget_ok,
            can_spawn: capacity_ok && cooldown_ok && budget_ok,
        })
    }

    /// All three gates must pass.
    pub async fn can_spawn_worker(&self) -> ApiResult<bool> {
        let status = self.get_status().await?;
        if !status.can_spawn {
            debug!(
                capacity_ok = status.capacity_ok,
                cooldown_ok = status.cooldown_ok,
                budget_ok = status.budget_ok,
                "spawn gated"
            );
        }
        Ok(status.can_spawn)
    }

    /// Record a spawn for the cooldown gate.
    pub async fn record_spawn(&self) -> ApiResult<()> {
        let mut kv = self.kv.clone();
        let _: () = kv
            .set(self.last_spawn_key(), Utc::now().timestamp_millis())
            .await?;
        Ok(())
    }

    /// Count one iteration toward today's budget.
    pub async fn record_iteration(&self) -> ApiResult<i64> {
        self.iterations_today().await?;
        let mut kv = self.kv.clone();
        let count: i64 = kv.incr(self.iterations_key(), 1i64).await?;
        Ok(count)
    }

    /// Capacity is derived from the workers table, so finishing a worker
    /// needs no bookkeeping here. Kept as a stable interface for callers.
    pub fn record_worker_done(&self) {}
}
