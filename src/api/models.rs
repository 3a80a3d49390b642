//! API request and response models

use crate::error::{ModelError, ModelResult};
use crate::registry::ModelState;
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// `?pipeline=<p>&refresh=1`
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub pipeline: Option<String>,
    pub refresh: Option<String>,
}

impl ListQuery {
    pub fn pipeline(&self) -> ModelResult<&str> {
        required_pipeline(self.pipeline.as_deref())
    }

    pub fn refresh(&self) -> bool {
        is_truthy(self.refresh.as_deref())
    }
}

/// `?refresh=1&pipeline=<p>` on a single model
#[derive(Debug, Default, Deserialize)]
pub struct DetailQuery {
    pub refresh: Option<String>,
    /// Pipeline the caller browsed from, stored with the cached record
    pub pipeline: Option<String>,
}

impl DetailQuery {
    pub fn refresh(&self) -> bool {
        is_truthy(self.refresh.as_deref())
    }
}

/// `?pipeline=<p>&force=true`
#[derive(Debug, Default, Deserialize)]
pub struct DownloadAllQuery {
    pub pipeline: Option<String>,
    pub force: Option<String>,
}

impl DownloadAllQuery {
    pub fn pipeline(&self) -> ModelResult<&str> {
        required_pipeline(self.pipeline.as_deref())
    }

    pub fn force(&self) -> bool {
        is_truthy(self.force.as_deref())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelStateResponse {
    pub id: String,
    pub state: ModelState,
}

/// Payload of an SSE `progress` event
#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub done: usize,
    pub total: usize,
    pub percent: u8,
}

fn required_pipeline(pipeline: Option<&str>) -> ModelResult<&str> {
    pipeline
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ModelError::InvalidRequest("pipeline query parameter is required".to_string()))
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "true" | "yes"))
}
