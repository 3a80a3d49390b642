//! Local catalog cache
//!
//! Durable keyed store backing the "don't hit the network unless asked"
//! policy. One JSON document holds both tables:
//! ```text
//! {
//!   "lists":    { "<pipeline>": { "<model id>": CatalogEntry, ... }, ... },
//!   "metadata": { "<model id>": { "pipeline": "...", "metadata": ModelMetadata } }
//! }
//! ```
//! Writes are upserts: rows missing from a new batch are never pruned. There
//! is no expiry; freshness is decided by the caller's refresh flag.

use super::catalog::CatalogEntry;
use super::metadata::ModelMetadata;
use crate::error::ModelResult;
use crate::storage::{FileSystemStorage, StorageBackend};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(default)]
    lists: BTreeMap<String, BTreeMap<String, CatalogEntry>>,
    #[serde(default)]
    metadata: BTreeMap<String, CachedMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedMetadata {
    /// Pipeline the record was requested under, empty when unknown
    #[serde(default)]
    pipeline: String,
    metadata: ModelMetadata,
}

/// File-backed catalog cache, loaded lazily on first access
pub struct CacheStore {
    path: PathBuf,
    storage: Arc<dyn StorageBackend>,
    document: Mutex<Option<CacheDocument>>,
}

impl CacheStore {
    /// Create a cache store with custom storage backend
    pub fn new_with_storage(path: PathBuf, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            path,
            storage,
            document: Mutex::new(None),
        }
    }

    /// Create a cache store with default filesystem storage
    pub fn new(path: PathBuf) -> Self {
        Self::new_with_storage(path, Arc::new(FileSystemStorage::new()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached listing for a pipeline, `None` if the pipeline was never stored
    pub async fn get_list(&self, pipeline: &str) -> ModelResult<Option<Vec<CatalogEntry>>> {
        let mut guard = self.document.lock().await;
        let document = self.loaded(&mut guard).await?;

        Ok(document
            .lists
            .get(pipeline)
            .map(|rows| rows.values().cloned().collect()))
    }

    /// Upsert a listing, key by key
    pub async fn put_list(&self, pipeline: &str, entries: &[CatalogEntry]) -> ModelResult<()> {
        let mut guard = self.document.lock().await;
        let mut document = self.loaded(&mut guard).await?.clone();

        let rows = document.lists.entry(pipeline.to_string()).or_default();
        for entry in entries {
            rows.insert(entry.id.clone(), entry.clone());
        }

        self.persist(&document).await?;
        *guard = Some(document);

        tracing::debug!(pipeline = %pipeline, count = entries.len(), "Listing cached");
        Ok(())
    }

    /// Cached enriched record for one model
    pub async fn get_metadata(&self, id: &str) -> ModelResult<Option<ModelMetadata>> {
        let mut guard = self.document.lock().await;
        let document = self.loaded(&mut guard).await?;

        Ok(document.metadata.get(id).map(|cached| cached.metadata.clone()))
    }

    /// Upsert the enriched record for one model
    pub async fn put_metadata(&self, pipeline_hint: &str, metadata: &ModelMetadata) -> ModelResult<()> {
        let mut guard = self.document.lock().await;
        let mut document = self.loaded(&mut guard).await?.clone();

        document.metadata.insert(
            metadata.id().to_string(),
            CachedMetadata {
                pipeline: pipeline_hint.to_string(),
                metadata: metadata.clone(),
            },
        );

        self.persist(&document).await?;
        *guard = Some(document);

        tracing::debug!(model_id = %metadata.id(), pipeline = %pipeline_hint, "Metadata cached");
        Ok(())
    }

    /// Whether the model appears in any cached listing or metadata row
    pub async fn contains(&self, id: &str) -> ModelResult<bool> {
        let mut guard = self.document.lock().await;
        let document = self.loaded(&mut guard).await?;

        Ok(document.metadata.contains_key(id)
            || document.lists.values().any(|rows| rows.contains_key(id)))
    }

    /// Return the in-memory document, reading it from storage on first use
    async fn loaded<'a>(
        &self,
        slot: &'a mut Option<CacheDocument>,
    ) -> ModelResult<&'a CacheDocument> {
        if slot.is_none() {
            *slot = Some(self.read().await?);
        }
        Ok(slot.get_or_insert_with(CacheDocument::default))
    }

    async fn read(&self) -> ModelResult<CacheDocument> {
        let Some(content) = self.storage.load(&self.path).await? else {
            tracing::debug!(path = ?self.path, "No catalog cache found, starting empty");
            return Ok(CacheDocument::default());
        };

        // The cache only holds data that can be fetched again
        match serde_json::from_str::<CacheDocument>(&content) {
            Ok(document) => Ok(document),
            Err(e) => {
                tracing::warn!(
                    path = ?self.path,
                    error = %e,
                    "Catalog cache is unreadable, starting empty"
                );
                Ok(CacheDocument::default())
            }
        }
    }

    async fn persist(&self, document: &CacheDocument) -> ModelResult<()> {
        let content =
            serde_json::to_string_pretty(document).context("Failed to serialize catalog cache")?;
        self.storage.save(&self.path, &content).await?;
        Ok(())
    }
}
