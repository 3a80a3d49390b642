//! Artifact download engine
//!
//! Materializes every file of a model into `<models_root>/<id>/<basename>`,
//! streaming each response body to disk and reporting progress after each
//! whole file. A failed download leaves whatever was written in place; the
//! next attempt fetches every file again.

use super::catalog::HubClient;
use crate::error::{ModelError, ModelResult};
use futures::StreamExt;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Shared flag used to stop an in-flight download
///
/// Checked before each file and between streamed chunks. Clones observe the
/// same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent and safe to call from any task
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Event delivered on a download progress channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress { done: usize, total: usize },
    Done { version: String },
    Error { message: String },
}

impl ProgressEvent {
    /// Whole-number completion percentage for `Progress`, 100 for `Done`
    pub fn percent(&self) -> Option<u8> {
        match self {
            ProgressEvent::Progress { done, total } if *total > 0 => {
                Some(((done * 100) / total).min(100) as u8)
            }
            ProgressEvent::Progress { .. } => Some(0),
            ProgressEvent::Done { .. } => Some(100),
            ProgressEvent::Error { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress { .. })
    }
}

/// Result of a completed download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    /// Content hash of the snapshot that was fetched
    pub version: String,
    pub local_path: PathBuf,
}

/// Reject ids that would escape the models root
pub fn validate_model_id(id: &str) -> ModelResult<()> {
    let invalid = |reason: &str| ModelError::InvalidModelId {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    if id.trim().is_empty() {
        return Err(invalid("empty id"));
    }
    if id.starts_with('/') || id.starts_with('\\') {
        return Err(invalid("absolute paths are not allowed"));
    }

    for component in Path::new(id).components() {
        match component {
            Component::Normal(_) => {}
            Component::ParentDir => return Err(invalid("'..' is not allowed")),
            _ => return Err(invalid("unexpected path component")),
        }
    }

    Ok(())
}

/// Downloads model artifacts from the hub into a local directory tree
pub struct Downloader {
    client: Arc<HubClient>,
    models_root: PathBuf,
}

impl Downloader {
    pub fn new(client: Arc<HubClient>, models_root: PathBuf) -> Self {
        Self {
            client,
            models_root,
        }
    }

    pub fn models_root(&self) -> &Path {
        &self.models_root
    }

    /// Local directory that holds the artifacts of `id`
    pub fn model_dir(&self, id: &str) -> ModelResult<PathBuf> {
        validate_model_id(id)?;
        Ok(self.models_root.join(id))
    }

    /// Fetch every artifact of `id`, calling `on_progress(done, total)` after each file
    pub async fn download(
        &self,
        id: &str,
        on_progress: &mut (dyn FnMut(usize, usize) + Send),
        cancel: &CancelToken,
    ) -> ModelResult<DownloadOutcome> {
        let model_dir = self.model_dir(id)?;

        let detail = self.client.fetch_detail(id).await?;
        let total = detail.files.len();

        fs::create_dir_all(&model_dir).await?;

        tracing::info!(
            model_id = %id,
            files = total,
            dir = ?model_dir,
            "Starting model download"
        );

        for (index, file) in detail.files.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(model_id = %id, done = index, total, "Download cancelled");
                return Err(ModelError::Cancelled { id: id.to_string() });
            }

            let dest = basename(&file.filename)
                .map(|name| model_dir.join(name))
                .ok_or_else(|| ModelError::ArtifactFetchFailed {
                    filename: file.filename.clone(),
                    cause: "artifact has no usable file name".to_string(),
                })?;

            tracing::debug!(model_id = %id, file = %file.filename, dest = ?dest, "Downloading file");
            let bytes = self.fetch_file(id, &file.filename, &dest, cancel).await?;
            crate::metrics::record_file_downloaded(bytes);

            on_progress(index + 1, total);
        }

        tracing::info!(model_id = %id, version = %detail.content_hash, "Model download complete");

        Ok(DownloadOutcome {
            version: detail.content_hash,
            local_path: model_dir,
        })
    }

    /// Stream one artifact to `dest`, returning the number of bytes written
    async fn fetch_file(
        &self,
        id: &str,
        filename: &str,
        dest: &Path,
        cancel: &CancelToken,
    ) -> ModelResult<u64> {
        let failed = |cause: String| ModelError::ArtifactFetchFailed {
            filename: filename.to_string(),
            cause,
        };

        let response = self
            .client
            .fetch_artifact(id, filename)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let mut file = fs::File::create(dest)
            .await
            .map_err(|e| failed(format!("cannot create {}: {}", dest.display(), e)))?;

        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(ModelError::Cancelled { id: id.to_string() });
            }

            let chunk = chunk.map_err(|e| failed(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| failed(e.to_string()))?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(|e| failed(e.to_string()))?;

        Ok(written)
    }
}

/// Final path segment of a registry filename
fn basename(filename: &str) -> Option<&str> {
    Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
}
