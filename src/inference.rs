//! Inference backend collaborator
//!
//! The manager only ever asks the backend to load the model found at a path.

use crate::error::{ModelError, ModelResult};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Something that can switch the model it serves
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Load the model stored at `path`, replacing the current one
    async fn load_model(&self, path: &Path) -> ModelResult<()>;
}

/// llama.cpp-style server that reloads its model via `POST /props`
pub struct LlamaServerClient {
    http: reqwest::Client,
    base_url: String,
}

impl LlamaServerClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl InferenceBackend for LlamaServerClient {
    async fn load_model(&self, path: &Path) -> ModelResult<()> {
        let url = format!("{}/props", self.base_url);
        let failed = |message: String| ModelError::InferenceLoadFailed {
            path: path.display().to_string(),
            message,
        };

        tracing::debug!(url = %url, path = ?path, "Asking inference backend to load model");

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "model": path }))
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        tracing::info!(path = ?path, "Inference backend loaded model");
        Ok(())
    }
}
