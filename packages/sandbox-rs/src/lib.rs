//! HTTP client for a sandbox-runtime service.
//!
//! The runtime exposes a small REST surface for creating and stopping
//! isolated sandboxes (containers). This crate talks to it with direct
//! API calls; the orchestrator never shells out to a container engine.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};

pub mod models;

pub use models::{CreateSandboxRequest, Sandbox, SandboxState};

/// Connection options for a sandbox runtime.
#[derive(Debug, Clone)]
pub struct SandboxOptions {
    /// Base URL of the runtime, e.g. `http://sandbox-runtime:2280`.
    pub base_url: String,
    /// Optional bearer token for the runtime API.
    pub api_token: Option<String>,
}

/// Client for the sandbox-runtime REST API.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    options: SandboxOptions,
}

impl SandboxClient {
    pub fn new(options: SandboxOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, options })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.options.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.options.api_token {
            Some(token) => req.header("Authorization", format!("Bearer {}", token)),
            None => req,
        }
    }

    /// Create a sandbox from an image with the given environment.
    ///
    /// The runtime pulls the image if necessary and starts the sandbox
    /// before responding, so a returned [`Sandbox`] is already running.
    pub async fn create_sandbox(&self, request: &CreateSandboxRequest) -> Result<Sandbox> {
        let response = self
            .authorize(self.client.post(self.url("/v1/sandboxes")))
            .json(request)
            .send()
            .await
            .context("Failed to send create request to sandbox runtime")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Sandbox runtime error: {} - {}", status, text);
        }

        response
            .json()
            .await
            .context("Failed to parse sandbox runtime response")
    }

    /// Stop and remove a sandbox.
    ///
    /// A missing sandbox is not an error: the runtime may have already
    /// reclaimed it, and callers stopping a dead worker only care that
    /// the sandbox is gone afterwards.
    pub async fn stop_sandbox(&self, sandbox_id: &str) -> Result<()> {
        let response = self
            .authorize(
                self.client
                    .delete(self.url(&format!("/v1/sandboxes/{}", sandbox_id))),
            )
            .send()
            .await
            .context("Failed to send stop request to sandbox runtime")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Sandbox runtime error: {} - {}", status, text);
        }

        Ok(())
    }
}

impl CreateSandboxRequest {
    /// Request for an image with no environment or labels.
    pub fn image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            env: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = SandboxClient::new(SandboxOptions {
            base_url: "http://localhost:2280/".to_string(),
            api_token: None,
        })
        .unwrap();

        assert_eq!(client.url("/v1/sandboxes"), "http://localhost:2280/v1/sandboxes");
    }

    #[test]
    fn test_request_builder_accumulates_env() {
        let request = CreateSandboxRequest::image("factory-worker:latest")
            .with_env("WORKER_ID", "w-1")
            .with_env("ORCHESTRATOR_URL", "http://localhost:8080")
            .with_label("factory.mode", "execution");

        assert_eq!(request.image, "factory-worker:latest");
        assert_eq!(request.env.len(), 2);
        assert_eq!(request.labels.get("factory.mode").map(String::as_str), Some("execution"));
    }
}
