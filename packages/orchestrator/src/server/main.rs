// Main entry point for the factory orchestrator

use std::sync::Arc;

use anyhow::{Context, Result};
use orchestrator_core::kernel::supervisor::{Supervisor, SupervisorConfig};
use orchestrator_core::kernel::{SandboxAdapter, Services};
use orchestrator_core::server::build_app;
use orchestrator_core::Config;
use sandbox::{SandboxClient, SandboxOptions};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,orchestrator_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting factory orchestrator");

    // Load configuration
    let config = Arc::new(Config::from_env().context("Failed to load configuration")?);
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Connect to the rate-limiter KV
    let kv_client =
        redis::Client::open(config.redis_url.as_str()).context("Invalid REDIS_URL")?;
    let kv = kv_client
        .get_connection_manager()
        .await
        .context("Failed to connect to Redis")?;
    tracing::info!("KV connected");

    // Sandbox runtime client
    let sandbox_client = SandboxClient::new(SandboxOptions {
        base_url: config.sandbox_runtime_url.clone(),
        api_token: config.sandbox_api_token.clone(),
    })
    .context("Failed to create sandbox runtime client")?;
    let sandbox_runtime = Arc::new(SandboxAdapter::new(sandbox_client));

    // Wire domain services
    let services = Services::build(config.clone(), pool, kv, sandbox_runtime);

    // Spawn the supervisory loop
    let supervisor = Supervisor::new(
        services.queue.clone(),
        services.workers.clone(),
        SupervisorConfig {
            loop_interval: std::time::Duration::from_millis(config.loop_interval_ms),
        },
    );
    tokio::spawn(async move {
        if let Err(e) = supervisor.run_until_shutdown().await {
            tracing::error!(error = %e, "Supervisor exited with error");
        }
    });

    // Build application
    let app = build_app(services);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
