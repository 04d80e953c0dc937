//! Integration tests for the three spawn gates: fleet capacity, cooldown
//! and the daily iteration budget with its date rollover.

mod common;

use crate::common::TestHarness;
use chrono::{Duration, Utc};
use orchestrator_core::kernel::rate_limiter::{RateLimiter, RateLimiterConfig};
use redis::AsyncCommands;
use test_context::test_context;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Tests that create workers shift the global active count, so they must
/// not interleave with the capacity assertions.
static FLEET_LOCK: Mutex<()> = Mutex::const_new(());

/// Limiter with its own KV namespace so tests cannot see each other.
fn limiter(ctx: &TestHarness, max_workers: i64, cooldown_seconds: i64, daily_budget: i64) -> RateLimiter {
    RateLimiter::new(
        ctx.db_pool.clone(),
        ctx.kv.clone(),
        RateLimiterConfig {
            key_prefix: format!("gate-{}", Uuid::new_v4().simple()),
            max_workers,
            cooldown_seconds,
            daily_budget,
        },
    )
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_cooldown_gate(ctx: &mut TestHarness) {
    let prefix = format!("gate-{}", Uuid::new_v4().simple());
    let rate = RateLimiter::new(
        ctx.db_pool.clone(),
        ctx.kv.clone(),
        RateLimiterConfig {
            key_prefix: prefix.clone(),
            max_workers: 1_000,
            cooldown_seconds: 60,
            daily_budget: 1_000_000,
        },
    );

    // Never spawned: cooldown passes.
    let status = rate.get_status().await.unwrap();
    assert!(status.cooldown_ok);
    assert!(status.seconds_since_last_spawn.is_none());

    // Fresh spawn: gate closes.
    rate.record_spawn().await.unwrap();
    let status = rate.get_status().await.unwrap();
    assert!(!status.cooldown_ok);
    assert!(!status.can_spawn);

    // Backdate the stored spawn time past the cooldown: gate reopens.
    let mut kv = ctx.kv.clone();
    let old = (Utc::now() - Duration::seconds(61)).timestamp_millis();
    let _: () = kv
        .set(format!("{}:rate:last_spawn", prefix), old)
        .await
        .unwrap();

    let status = rate.get_status().await.unwrap();
    assert!(status.cooldown_ok);
    assert!(status.seconds_since_last_spawn.unwrap() >= 60);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_daily_budget_gate(ctx: &mut TestHarness) {
    let rate = limiter(ctx, 1_000, 0, 5);

    for expected in 1..=5 {
        let count = rate.record_iteration().await.unwrap();
        assert_eq!(count, expected);
    }

    let status = rate.get_status().await.unwrap();
    assert_eq!(status.iterations_today, 5);
    assert!(!status.budget_ok);
    assert!(!rate.can_spawn_worker().await.unwrap());

    // Iterations keep being accepted even over budget: heartbeats must
    // not fail just because spawning is gated.
    let count = rate.record_iteration().await.unwrap();
    assert_eq!(count, 6);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_daily_budget_resets_on_date_rollover(ctx: &mut TestHarness) {
    let prefix = format!("gate-{}", Uuid::new_v4().simple());
    let rate = RateLimiter::new(
        ctx.db_pool.clone(),
        ctx.kv.clone(),
        RateLimiterConfig {
            key_prefix: prefix.clone(),
            max_workers: 1_000,
            cooldown_seconds: 0,
            daily_budget: 100,
        },
    );

    // Exhaust the budget "yesterday".
    let mut kv = ctx.kv.clone();
    let _: () = kv
        .set(format!("{}:rate:daily_iterations", prefix), 100i64)
        .await
        .unwrap();
    let yesterday = (Utc::now() - Duration::days(1)).format("%Y-%m-%d").to_string();
    let _: () = kv
        .set(format!("{}:rate:daily_reset_date", prefix), yesterday)
        .await
        .unwrap();

    // First read after rollover resets the counter and opens the gate.
    let status = rate.get_status().await.unwrap();
    assert_eq!(status.iterations_today, 0);
    assert!(status.budget_ok);
    assert!(status.can_spawn);

    // Counting resumes from zero.
    assert_eq!(rate.record_iteration().await.unwrap(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_capacity_gate_reads_the_workers_table(ctx: &mut TestHarness) {
    let _guard = FLEET_LOCK.lock().await;

    // Allow exactly one more worker than currently active anywhere.
    let active: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM workers WHERE status IN ('starting', 'running')")
            .fetch_one(&ctx.db_pool)
            .await
            .unwrap();

    let rate = limiter(ctx, active + 1, 0, 1_000_000);
    assert!(rate.get_status().await.unwrap().capacity_ok);

    // One new active worker saturates the fleet for this limiter.
    let item = ctx.add_assigned_item("capacity probe").await;
    let _worker = ctx.register_worker(item.id).await;

    let status = rate.get_status().await.unwrap();
    assert!(status.active_workers >= active + 1);
    assert!(!status.capacity_ok);
    assert!(!status.can_spawn);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_heartbeats_survive_budget_exhaustion(ctx: &mut TestHarness) {
    let _guard = FLEET_LOCK.lock().await;

    // A worker manager wired to a zero-budget limiter: spawn is gated,
    // heartbeats still land.
    let item = ctx.add_assigned_item("over budget").await;
    let worker = ctx.register_worker(item.id).await;

    let rate = limiter(ctx, 1_000, 0, 0);
    assert!(!rate.can_spawn_worker().await.unwrap());

    // Heartbeat goes through the normal manager (large budget) and the
    // gated limiter still accepts the iteration record.
    ctx.services.workers.heartbeat(worker.id, 1).await.unwrap();
    assert_eq!(rate.record_iteration().await.unwrap(), 1);
}
