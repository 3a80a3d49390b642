//! Local model lifecycle state
//!
//! Tracks which models are materialized on disk and which single one is
//! active. The active flag is never stored per record: it is derived from
//! `active_model` whenever a view is built, so "at most one active" cannot be
//! violated by a partial write.
//!
//! On-disk format:
//! ```json
//! {
//!   "active_model": "org/model",
//!   "models": { "org/model": { "id": "...", "local_path": "...", "version": "...", "downloaded_at": "..." } }
//! }
//! ```

use crate::error::{ModelError, ModelResult};
use crate::storage::{FileSystemStorage, StorageBackend, path_lock};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A model whose artifacts have been downloaded at least once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalModelRecord {
    pub id: String,
    pub local_path: PathBuf,
    /// Content hash of the remote snapshot that was downloaded
    pub version: String,
    pub downloaded_at: DateTime<Utc>,
}

/// Record as returned to callers, with the derived active flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalModelView {
    #[serde(flatten)]
    pub record: LocalModelRecord,
    pub active: bool,
}

/// Persisted lifecycle document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleState {
    #[serde(rename = "active_model", default)]
    active_id: Option<String>,
    #[serde(rename = "models", default)]
    records: BTreeMap<String, LocalModelRecord>,
}

impl LifecycleState {
    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&LocalModelRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or overwrite a record, leaving the active id as it was
    pub fn record(&mut self, record: LocalModelRecord) {
        self.records.insert(record.id.clone(), record);
    }

    /// Make `id` the active model
    ///
    /// Returns `None` and leaves the state untouched when `id` has no record.
    pub fn activate(&mut self, id: &str) -> Option<&LocalModelRecord> {
        let record = self.records.get(id)?;
        self.active_id = Some(id.to_string());
        Some(record)
    }

    pub fn view(&self, id: &str) -> Option<LocalModelView> {
        self.records.get(id).map(|record| self.view_of(record))
    }

    pub fn active_view(&self) -> Option<LocalModelView> {
        self.active_id.as_deref().and_then(|id| self.view(id))
    }

    /// All records ordered by id
    pub fn views(&self) -> Vec<LocalModelView> {
        self.records.values().map(|r| self.view_of(r)).collect()
    }

    fn view_of(&self, record: &LocalModelRecord) -> LocalModelView {
        LocalModelView {
            active: self.active_id.as_deref() == Some(record.id.as_str()),
            record: record.clone(),
        }
    }

    /// Clear an active id that no record backs; returns the dropped id
    fn drop_dangling_active(&mut self) -> Option<String> {
        match &self.active_id {
            Some(id) if !self.records.contains_key(id) => self.active_id.take(),
            _ => None,
        }
    }
}

/// Sole writer of the lifecycle document
pub struct LifecycleManager {
    state_file: PathBuf,
    storage: Arc<dyn StorageBackend>,
}

impl LifecycleManager {
    /// Create a lifecycle manager with custom storage backend
    pub fn new_with_storage(state_file: PathBuf, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            state_file,
            storage,
        }
    }

    /// Create a lifecycle manager with default filesystem storage
    pub fn new(state_file: PathBuf) -> Self {
        Self::new_with_storage(state_file, Arc::new(FileSystemStorage::new()))
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Load state from disk
    /// FAILS HARD if the state file is corrupted - user must fix or delete
    pub async fn load(&self) -> ModelResult<LifecycleState> {
        let Some(content) = self.storage.load(&self.state_file).await? else {
            tracing::debug!(path = ?self.state_file, "No lifecycle state found, starting fresh");
            return Ok(LifecycleState::default());
        };

        let mut state: LifecycleState = serde_json::from_str(&content).with_context(|| {
            format!(
                "Failed to parse lifecycle state: {:?}. File may be corrupted. \
                Please delete or fix the file manually.",
                self.state_file
            )
        })?;

        if let Some(dropped) = state.drop_dangling_active() {
            tracing::warn!(
                path = ?self.state_file,
                model_id = %dropped,
                "Active model has no local record, ignoring it"
            );
        }

        Ok(state)
    }

    /// Replace the whole document atomically
    pub async fn save(&self, state: &LifecycleState) -> ModelResult<()> {
        let content =
            serde_json::to_string_pretty(state).context("Failed to serialize lifecycle state")?;
        self.storage.save(&self.state_file, &content).await?;

        tracing::debug!(
            path = ?self.state_file,
            models = state.len(),
            active = ?state.active_id(),
            "Lifecycle state saved"
        );
        Ok(())
    }

    /// Register (or refresh) a downloaded model
    pub async fn record_download(
        &self,
        id: &str,
        local_path: &Path,
        version: &str,
    ) -> ModelResult<LocalModelView> {
        let lock = path_lock(&self.state_file);
        let _guard = lock.lock().await;

        let mut state = self.load().await?;
        state.record(LocalModelRecord {
            id: id.to_string(),
            local_path: local_path.to_path_buf(),
            version: version.to_string(),
            downloaded_at: Utc::now(),
        });
        self.save(&state).await?;

        tracing::info!(model_id = %id, version = %version, path = ?local_path, "Model recorded as downloaded");

        state
            .view(id)
            .ok_or_else(|| ModelError::NotDownloaded { id: id.to_string() })
    }

    /// Switch the active model, returning its local path
    pub async fn activate(&self, id: &str) -> ModelResult<PathBuf> {
        let lock = path_lock(&self.state_file);
        let _guard = lock.lock().await;

        let mut state = self.load().await?;
        let local_path = match state.activate(id) {
            Some(record) => record.local_path.clone(),
            None => return Err(ModelError::NotDownloaded { id: id.to_string() }),
        };
        self.save(&state).await?;

        tracing::info!(model_id = %id, path = ?local_path, "Model activated");
        Ok(local_path)
    }

    pub async fn active(&self) -> ModelResult<Option<LocalModelView>> {
        Ok(self.load().await?.active_view())
    }

    pub async fn list(&self) -> ModelResult<Vec<LocalModelView>> {
        Ok(self.load().await?.views())
    }

    pub async fn get(&self, id: &str) -> ModelResult<Option<LocalModelView>> {
        Ok(self.load().await?.view(id))
    }
}
