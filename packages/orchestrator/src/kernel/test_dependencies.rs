// TestDependencies - mock implementations for testing
//
// Provides a recording sandbox runtime that integration tests inject in
// place of the real client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use super::traits::BaseSandboxRuntime;

/// One recorded create call.
#[derive(Debug, Clone)]
pub struct CreatedSandbox {
    pub container_id: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
}

/// Spy sandbox runtime that records all create/stop calls.
pub struct MockSandboxRuntime {
    created: Arc<Mutex<Vec<CreatedSandbox>>>,
    stopped: Arc<Mutex<Vec<String>>>,
    fail_create: AtomicBool,
}

impl MockSandboxRuntime {
    pub fn new() -> Self {
        Self {
            created: Arc::new(Mutex::new(Vec::new())),
            stopped: Arc::new(Mutex::new(Vec::new())),
            fail_create: AtomicBool::new(false),
        }
    }

    /// Make subsequent create calls fail until cleared.
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// All sandboxes created so far.
    pub fn created(&self) -> Vec<CreatedSandbox> {
        self.created.lock().unwrap().clone()
    }

    /// All container ids stopped so far.
    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

impl Default for MockSandboxRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseSandboxRuntime for MockSandboxRuntime {
    async fn create_sandbox(
        &self,
        image: &str,
        env: HashMap<String, String>,
        labels: HashMap<String, String>,
    ) -> Result<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            anyhow::bail!("mock sandbox runtime: create failure injected");
        }

        let container_id = format!("sandbox-{}", Uuid::new_v4().simple());
        self.created.lock().unwrap().push(CreatedSandbox {
            container_id: container_id.clone(),
            image: image.to_string(),
            env,
            labels,
        });
        Ok(container_id)
    }

    async fn stop_sandbox(&self, container_id: &str) -> Result<()> {
        self.stopped.lock().unwrap().push(container_id.to_string());
        Ok(())
    }
}
