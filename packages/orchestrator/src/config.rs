use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub port: u16,

    /// How often the supervisory loop runs.
    pub loop_interval_ms: u64,
    /// Workers without a heartbeat for this long are reaped.
    pub stale_threshold_seconds: i64,

    /// Fleet capacity: maximum concurrently active workers.
    pub max_workers: i64,
    /// Daily iteration budget across the fleet.
    pub daily_budget: i64,
    /// Minimum gap between successive spawns.
    pub cooldown_seconds: i64,
    /// Maximum requeue attempts per work item.
    pub max_retries: i32,

    /// Namespace prefix for rate-limiter KV keys.
    pub rate_key_prefix: String,

    /// Sandbox runtime endpoint and images.
    pub sandbox_runtime_url: String,
    pub sandbox_api_token: Option<String>,
    pub execution_image: String,
    pub verification_image: String,

    /// Base URL workers use to call back into this service.
    pub orchestrator_base_url: String,
    /// Token handed to workers for their callbacks.
    pub worker_auth_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            loop_interval_ms: env::var("LOOP_INTERVAL_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .context("LOOP_INTERVAL_MS must be a valid number")?,
            stale_threshold_seconds: env::var("STALE_THRESHOLD_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("STALE_THRESHOLD_SECONDS must be a valid number")?,
            max_workers: env::var("MAX_WORKERS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("MAX_WORKERS must be a valid number")?,
            daily_budget: env::var("DAILY_BUDGET")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .context("DAILY_BUDGET must be a valid number")?,
            cooldown_seconds: env::var("COOLDOWN_SECONDS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("COOLDOWN_SECONDS must be a valid number")?,
            max_retries: env::var("MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("MAX_RETRIES must be a valid number")?,
            rate_key_prefix: env::var("RATE_KEY_PREFIX")
                .unwrap_or_else(|_| "factory".to_string()),
            sandbox_runtime_url: env::var("SANDBOX_RUNTIME_URL")
                .context("SANDBOX_RUNTIME_URL must be set")?,
            sandbox_api_token: env::var("SANDBOX_API_TOKEN").ok(),
            execution_image: env::var("EXECUTION_IMAGE")
                .unwrap_or_else(|_| "factory-worker:latest".to_string()),
            verification_image: env::var("VERIFICATION_IMAGE")
                .unwrap_or_else(|_| "factory-verifier:latest".to_string()),
            orchestrator_base_url: env::var("ORCHESTRATOR_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            worker_auth_token: env::var("WORKER_AUTH_TOKEN").ok(),
        })
    }
}
