//! Test harness over throwaway Postgres and Redis containers.
//!
//! One stack serves the whole test run: containers come up on the first
//! test, migrations run once, and every test then builds its own services
//! on top with a private rate-limiter namespace and a mock sandbox
//! runtime. Tests isolate by the ids they create, not by wiping tables.

use std::sync::Arc;

use anyhow::{Context, Result};
use orchestrator_core::config::Config;
use orchestrator_core::domains::work_items::{
    AddWorkItemRequest, NewWorkItem, WorkItem, WorkItemPriority, WorkItemStatus, WorkItemType,
};
use orchestrator_core::domains::workers::Worker;
use orchestrator_core::kernel::test_dependencies::MockSandboxRuntime;
use orchestrator_core::kernel::Services;
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;
use uuid::Uuid;

// =============================================================================
// Test Stack (one per `cargo test` run)
// =============================================================================

/// Connection strings for the run-wide containers. The container handles
/// ride along only to keep them alive until the process exits.
pub struct TestStack {
    pub db_url: String,
    pub redis_url: String,
    _pg: ContainerAsync<GenericImage>,
    _redis: ContainerAsync<Redis>,
}

static STACK: OnceCell<TestStack> = OnceCell::const_new();

async fn stack() -> &'static TestStack {
    STACK
        .get_or_init(|| async {
            start_stack().await.expect("test stack failed to start")
        })
        .await
}

async fn start_stack() -> Result<TestStack> {
    // Respect RUST_LOG; try_init tolerates a subscriber already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let (pg, db_url) = start_postgres().await?;
    migrate(&db_url).await?;

    let redis = Redis::default()
        .start()
        .await
        .context("redis container failed to start")?;
    let redis_url = format!(
        "redis://{}:{}",
        redis.get_host().await?,
        redis.get_host_port_ipv4(6379).await?
    );

    Ok(TestStack {
        db_url,
        redis_url,
        _pg: pg,
        _redis: redis,
    })
}

/// The learnings table carries a pgvector embedding column, so plain
/// `postgres` images will not do.
async fn start_postgres() -> Result<(ContainerAsync<GenericImage>, String)> {
    let pg = GenericImage::new("pgvector/pgvector", "pg16")
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_env_var("POSTGRES_USER", "factory")
        .with_env_var("POSTGRES_PASSWORD", "factory")
        .with_env_var("POSTGRES_DB", "factory_test")
        .start()
        .await
        .context("postgres container failed to start")?;

    let db_url = format!(
        "postgresql://factory:factory@{}:{}/factory_test",
        pg.get_host().await?,
        pg.get_host_port_ipv4(5432).await?
    );
    Ok((pg, db_url))
}

/// Apply the schema once; individual tests connect with their own pools.
async fn migrate(db_url: &str) -> Result<()> {
    let pool = PgPool::connect(db_url)
        .await
        .context("could not reach the test database for migrations")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("migrations failed")?;
    pool.close().await;
    Ok(())
}

// =============================================================================
// Test Harness
// =============================================================================

/// Per-test context over the shared containers.
pub struct TestHarness {
    pub db_pool: PgPool,
    pub kv: ConnectionManager,
    pub services: Services,
    pub sandbox: Arc<MockSandboxRuntime>,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let stack = stack().await;

        let db_pool = PgPool::connect(&stack.db_url)
            .await
            .context("Failed to connect to test database")?;

        let kv_client = redis::Client::open(stack.redis_url.as_str())?;
        let kv = kv_client.get_connection_manager().await?;

        // Unique KV namespace per test so rate-limiter state is isolated.
        let config = Arc::new(Config {
            database_url: stack.db_url.clone(),
            redis_url: stack.redis_url.clone(),
            port: 0,
            loop_interval_ms: 50,
            stale_threshold_seconds: 60,
            max_workers: 1_000,
            daily_budget: 1_000_000,
            cooldown_seconds: 0,
            max_retries: 3,
            rate_key_prefix: format!("test-{}", Uuid::new_v4().simple()),
            sandbox_runtime_url: "http://sandbox.invalid".to_string(),
            sandbox_api_token: None,
            execution_image: "factory-worker:test".to_string(),
            verification_image: "factory-verifier:test".to_string(),
            orchestrator_base_url: "http://localhost:8080".to_string(),
            worker_auth_token: Some("test-token".to_string()),
        });

        let sandbox = Arc::new(MockSandboxRuntime::new());
        let services = Services::build(
            config.clone(),
            db_pool.clone(),
            kv.clone(),
            sandbox.clone(),
        );

        Ok(Self {
            db_pool,
            kv,
            services,
            sandbox,
        })
    }

    /// Add a queued work item with a unique repo name.
    pub async fn add_item(&self, spec: &str, priority: WorkItemPriority) -> WorkItem {
        self.services
            .queue
            .add(AddWorkItemRequest {
                repo: format!("octo/{}", Uuid::new_v4().simple()),
                spec: Some(spec.to_string()),
                description: None,
                branch: None,
                priority: Some(priority),
                max_iterations: None,
                metadata: None,
                item_type: None,
            })
            .await
            .expect("Failed to add work item")
    }

    /// Insert a work item directly in `assigned`, as if the dispatch loop
    /// had already claimed it. A single insert, so no other test's claim
    /// loop can race the transition.
    pub async fn add_assigned_item(&self, spec: &str) -> WorkItem {
        let suffix = Uuid::new_v4().simple().to_string();
        WorkItem::create(
            NewWorkItem {
                repo: format!("octo/{}", suffix),
                branch: format!("factory/{}", &suffix[..8]),
                spec: spec.to_string(),
                description: None,
                priority: WorkItemPriority::Medium,
                status: WorkItemStatus::Assigned,
                max_iterations: 10,
                metadata: serde_json::json!({}),
                item_type: WorkItemType::Execution,
            },
            &self.db_pool,
        )
        .await
        .expect("Failed to insert assigned work item")
    }

    /// Register a worker for a work item (the container callback path).
    pub async fn register_worker(&self, work_item_id: Uuid) -> Worker {
        let (worker, _item) = self
            .services
            .workers
            .register(work_item_id)
            .await
            .expect("Failed to register worker");
        worker
    }

    /// Backdate a worker's heartbeat so it reads as stale.
    pub async fn backdate_heartbeat(&self, worker_id: Uuid, seconds: i64) {
        sqlx::query(
            "UPDATE workers SET last_heartbeat = NOW() - ($2 || ' seconds')::INTERVAL WHERE id = $1",
        )
        .bind(worker_id)
        .bind(seconds.to_string())
        .execute(&self.db_pool)
        .await
        .expect("Failed to backdate heartbeat");
    }

    /// Lift an item's retry backoff so it is immediately dispatchable.
    pub async fn clear_backoff(&self, work_item_id: Uuid) {
        sqlx::query("UPDATE work_items SET next_retry_at = NULL WHERE id = $1")
            .bind(work_item_id)
            .execute(&self.db_pool)
            .await
            .expect("Failed to clear backoff");
    }
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        TestHarness::new()
            .await
            .expect("Failed to set up test harness")
    }

    async fn teardown(self) {
        self.db_pool.close().await;
    }
}
