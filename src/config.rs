//! Configuration structures and loading logic

use crate::models::catalog::DEFAULT_HUB_ENDPOINT;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub api_port: u16,
    /// Base URL of the Hugging Face compatible hub
    pub hub_endpoint: String,
    /// Root under which `<model id>/<file>` trees are written
    pub models_dir: PathBuf,
    pub state_file: PathBuf,
    pub cache_file: PathBuf,
    /// Inference server that receives `POST /props` on activation
    pub inference_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            hub_endpoint: DEFAULT_HUB_ENDPOINT.to_string(),
            models_dir: default_data_dir().join("models"),
            state_file: default_data_dir().join("state.json"),
            cache_file: default_data_dir().join("catalog-cache.json"),
            inference_url: default_inference_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(port) = std::env::var("MODEL_MANAGER_API_PORT") {
            config.api_port = port
                .parse()
                .context("Invalid MODEL_MANAGER_API_PORT value")?;
        }
        if let Ok(endpoint) = std::env::var("MODEL_MANAGER_HUB_ENDPOINT") {
            config.hub_endpoint = endpoint;
        }
        if let Ok(models_dir) = std::env::var("MODEL_MANAGER_MODELS_DIR") {
            config.models_dir = PathBuf::from(models_dir);
        }
        if let Ok(state_file) = std::env::var("MODEL_MANAGER_STATE_FILE") {
            config.state_file = PathBuf::from(state_file);
        }
        if let Ok(cache_file) = std::env::var("MODEL_MANAGER_CACHE_FILE") {
            config.cache_file = PathBuf::from(cache_file);
        }
        if let Ok(inference_url) = std::env::var("MODEL_MANAGER_INFERENCE_URL") {
            config.inference_url = inference_url;
        }

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }

        validate_http_url("hub_endpoint", &self.hub_endpoint)?;
        validate_http_url("inference_url", &self.inference_url)?;

        if self.state_file == self.cache_file {
            anyhow::bail!(
                "state_file and cache_file must differ (both {:?})",
                self.state_file
            );
        }

        std::fs::create_dir_all(&self.models_dir)
            .with_context(|| format!("Cannot create models directory: {:?}", self.models_dir))?;
        ensure_parent(&self.state_file, "state file")?;
        ensure_parent(&self.cache_file, "cache file")?;

        Ok(())
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<()> {
    let url = reqwest::Url::parse(value)
        .with_context(|| format!("Invalid {} URL: {:?}", field, value))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("{} must use http or https (got {:?})", field, value);
    }
    Ok(())
}

fn ensure_parent(path: &Path, what: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create {} directory: {:?}", what, parent))?;
    }
    Ok(())
}

// Default functions
fn default_api_port() -> u16 {
    9000
}
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("model-manager")
}
fn default_inference_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_request_timeout() -> u64 {
    30
}
