use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Request body for `POST /v1/sandboxes`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSandboxRequest {
    pub image: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

/// Lifecycle state reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    Pending,
    Running,
    Stopped,
}

/// A sandbox as reported by the runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct Sandbox {
    pub id: String,
    pub state: SandboxState,
    pub image: String,
}
