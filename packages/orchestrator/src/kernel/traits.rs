// Trait definitions for dependency injection
//
// Infrastructure traits only - no business logic. The worker manager owns
// every sandbox termination; nothing else talks to the runtime.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

/// Sandbox runtime: creates and stops isolated containers for workers.
#[async_trait]
pub trait BaseSandboxRuntime: Send + Sync {
    /// Create and start a sandbox; returns the runtime's container id.
    async fn create_sandbox(
        &self,
        image: &str,
        env: HashMap<String, String>,
        labels: HashMap<String, String>,
    ) -> Result<String>;

    /// Stop a sandbox. Must succeed when the container is already gone.
    async fn stop_sandbox(&self, container_id: &str) -> Result<()>;
}
