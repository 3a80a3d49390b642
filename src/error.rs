//! Error types for the model manager and their API responses

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Errors produced by the catalog, download and lifecycle components
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Transport-level failure talking to the registry (DNS, connect, timeout)
    #[error("Model registry unavailable at {url}: {message}")]
    RegistryUnavailable { url: String, message: String },

    /// The registry answered with a non-success status
    #[error("Model registry error (HTTP {status}): {body}")]
    RegistryError { status: u16, body: String },

    /// The registry answered but the payload could not be decoded
    #[error("Invalid registry response: {0}")]
    InvalidResponse(String),

    /// The total-count signal was missing from the stats query
    #[error("Global model statistics unavailable")]
    StatsUnavailable,

    /// A single artifact transfer failed, aborting the download
    #[error("Failed to fetch artifact {filename}: {cause}")]
    ArtifactFetchFailed { filename: String, cause: String },

    /// Activation requested for a model that has no local record
    #[error("Model not downloaded: {id}")]
    NotDownloaded { id: String },

    /// Model id that cannot be mapped to a local directory
    #[error("Invalid model id '{id}': {reason}")]
    InvalidModelId { id: String, reason: String },

    /// Malformed API request (missing or invalid parameter)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Download stopped through its cancellation token
    #[error("Download of {id} was cancelled")]
    Cancelled { id: String },

    /// The inference backend refused to load the activated model
    #[error("Inference backend failed to load {path}: {message}")]
    InferenceLoadFailed { path: String, message: String },

    /// Persisted state or cache could not be read or written
    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ModelResult<T> = Result<T, ModelError>;

impl ModelError {
    /// Build a transport error from a failed reqwest call
    pub fn unavailable(url: &str, err: &reqwest::Error) -> Self {
        ModelError::RegistryUnavailable {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether a caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::RegistryUnavailable { .. })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ModelError::NotDownloaded { .. }
            | ModelError::InvalidModelId { .. }
            | ModelError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ModelError::RegistryError { .. }
            | ModelError::InvalidResponse(_)
            | ModelError::StatsUnavailable => StatusCode::BAD_GATEWAY,
            ModelError::RegistryUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ModelError::ArtifactFetchFailed { .. }
            | ModelError::Cancelled { .. }
            | ModelError::InferenceLoadFailed { .. }
            | ModelError::Storage(_)
            | ModelError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ModelError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}
