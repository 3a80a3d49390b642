//! Registry facade
//!
//! Composes the hub client, catalog cache, download engine, lifecycle state
//! and inference backend into the operations callers use. Catalog reads are
//! cache-first unless a refresh is requested; a refresh still writes back so
//! later reads see the fresh data.

use crate::config::ManagerConfig;
use crate::error::{ModelError, ModelResult};
use crate::inference::{InferenceBackend, LlamaServerClient};
use crate::metrics::{self, LookupSource};
use crate::models::{
    CacheStore, CancelToken, CatalogEntry, Downloader, GlobalStats, HubClient, LifecycleManager,
    LocalModelView, ModelDetail, ModelMetadata, enrich,
};
use anyhow::Context;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Where a model id stands from this host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    /// Never seen in a listing or metadata lookup
    Unknown,
    /// Known from the catalog but not on disk
    Cataloged,
    Downloaded,
    Active,
}

/// Outcome of a bulk download over one pipeline
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkDownloadReport {
    pub pipeline: String,
    pub downloaded: Vec<String>,
    /// Already on disk and not forced
    pub skipped: Vec<String>,
    /// First failure, after which the run stopped
    pub failed: Option<BulkDownloadFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkDownloadFailure {
    pub id: String,
    pub error: String,
}

/// Entry point for catalog, download and activation operations
pub struct Registry {
    client: Arc<HubClient>,
    cache: CacheStore,
    downloader: Downloader,
    lifecycle: LifecycleManager,
    inference: Arc<dyn InferenceBackend>,
    /// Serializes read -> fetch -> write per cache key
    key_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Registry {
    pub fn new(
        client: Arc<HubClient>,
        cache: CacheStore,
        lifecycle: LifecycleManager,
        models_root: PathBuf,
        inference: Arc<dyn InferenceBackend>,
    ) -> Self {
        Self {
            downloader: Downloader::new(client.clone(), models_root),
            client,
            cache,
            lifecycle,
            inference,
            key_locks: DashMap::new(),
        }
    }

    /// Wire every component from configuration
    pub fn from_config(config: &ManagerConfig) -> anyhow::Result<Self> {
        let timeout = config.request_timeout();
        let client = HubClient::new(&config.hub_endpoint, timeout)
            .context("Failed to build hub client")?;
        let inference = LlamaServerClient::new(&config.inference_url, timeout)
            .context("Failed to build inference client")?;

        Ok(Self::new(
            Arc::new(client),
            CacheStore::new(config.cache_file.clone()),
            LifecycleManager::new(config.state_file.clone()),
            config.models_dir.clone(),
            Arc::new(inference),
        ))
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.key_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the map entry once no caller holds or waits on it
    fn release_key_lock(&self, key: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.key_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Catalog entries for a pipeline, from cache unless `refresh` or empty
    pub async fn list_models(&self, pipeline: &str, refresh: bool) -> ModelResult<Vec<CatalogEntry>> {
        let key = format!("list:{pipeline}");
        let lock = self.key_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.list_models_locked(pipeline, refresh).await
        };
        self.release_key_lock(&key, lock);
        result
    }

    async fn list_models_locked(&self, pipeline: &str, refresh: bool) -> ModelResult<Vec<CatalogEntry>> {
        if !refresh {
            match self.cache.get_list(pipeline).await {
                Ok(Some(entries)) if !entries.is_empty() => {
                    metrics::record_catalog_lookup("list", LookupSource::Cache);
                    tracing::debug!(pipeline = %pipeline, count = entries.len(), "Listing served from cache");
                    return Ok(entries);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(pipeline = %pipeline, error = %e, "Cache read failed, querying hub");
                }
            }
        }

        let entries = self.client.list_by_pipeline(pipeline).await?;
        metrics::record_catalog_lookup("list", LookupSource::Remote);

        if let Err(e) = self.cache.put_list(pipeline, &entries).await {
            tracing::warn!(pipeline = %pipeline, error = %e, "Failed to cache listing");
        }

        tracing::info!(pipeline = %pipeline, count = entries.len(), refresh, "Listing fetched from hub");
        Ok(entries)
    }

    /// Force a remote listing and overwrite the cached rows
    pub async fn refresh_models(&self, pipeline: &str) -> ModelResult<Vec<CatalogEntry>> {
        self.list_models(pipeline, true).await
    }

    /// Enriched metadata for one model, from cache unless `refresh`
    pub async fn model_metadata(
        &self,
        id: &str,
        pipeline_hint: Option<&str>,
        refresh: bool,
    ) -> ModelResult<ModelMetadata> {
        let key = format!("meta:{id}");
        let lock = self.key_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.model_metadata_locked(id, pipeline_hint, refresh).await
        };
        self.release_key_lock(&key, lock);
        result
    }

    async fn model_metadata_locked(
        &self,
        id: &str,
        pipeline_hint: Option<&str>,
        refresh: bool,
    ) -> ModelResult<ModelMetadata> {
        if !refresh {
            match self.cache.get_metadata(id).await {
                Ok(Some(metadata)) => {
                    metrics::record_catalog_lookup("metadata", LookupSource::Cache);
                    return Ok(metadata);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(model_id = %id, error = %e, "Cache read failed, querying hub");
                }
            }
        }

        let detail = self.client.fetch_detail(id).await?;
        let config = self.client.fetch_secondary_config(id).await;
        let metadata = enrich(&detail, config.as_ref());
        metrics::record_catalog_lookup("metadata", LookupSource::Remote);

        if let Err(e) = self
            .cache
            .put_metadata(pipeline_hint.unwrap_or_default(), &metadata)
            .await
        {
            tracing::warn!(model_id = %id, error = %e, "Failed to cache metadata");
        }

        Ok(metadata)
    }

    /// Uncached per-model statistics
    pub async fn model_detail(&self, id: &str) -> ModelResult<ModelDetail> {
        self.client.fetch_detail(id).await
    }

    pub async fn global_stats(&self) -> ModelResult<GlobalStats> {
        self.client.fetch_global_stats().await
    }

    /// Download every artifact of `id` and record it locally
    pub async fn download(
        &self,
        id: &str,
        on_progress: &mut (dyn FnMut(usize, usize) + Send),
        cancel: &CancelToken,
    ) -> ModelResult<LocalModelView> {
        let result = self.downloader.download(id, on_progress, cancel).await;
        metrics::record_download(result.is_ok());

        let outcome = result.inspect_err(|e| {
            tracing::warn!(model_id = %id, error = %e, "Model download failed");
        })?;

        let view = self
            .lifecycle
            .record_download(id, &outcome.local_path, &outcome.version)
            .await?;

        if let Ok(local) = self.lifecycle.list().await {
            metrics::update_local_model_count(local.len());
        }

        Ok(view)
    }

    /// Download every model listed for `pipeline`
    ///
    /// Models already on disk are skipped unless `force`. Stops at the first
    /// failure; the report lists what completed before it.
    pub async fn download_pipeline(&self, pipeline: &str, force: bool) -> ModelResult<BulkDownloadReport> {
        let entries = self.list_models(pipeline, false).await?;
        let mut report = BulkDownloadReport {
            pipeline: pipeline.to_string(),
            ..Default::default()
        };

        tracing::info!(pipeline = %pipeline, models = entries.len(), force, "Starting bulk download");

        for entry in entries {
            if !force && self.lifecycle.get(&entry.id).await?.is_some() {
                report.skipped.push(entry.id);
                continue;
            }

            let mut on_progress = |done: usize, total: usize| {
                tracing::debug!(model_id = %entry.id, done, total, "Bulk download progress");
            };
            match self
                .download(&entry.id, &mut on_progress, &CancelToken::new())
                .await
            {
                Ok(_) => report.downloaded.push(entry.id),
                Err(e) => {
                    report.failed = Some(BulkDownloadFailure {
                        id: entry.id,
                        error: e.to_string(),
                    });
                    break;
                }
            }
        }

        tracing::info!(
            pipeline = %pipeline,
            downloaded = report.downloaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.is_some(),
            "Bulk download finished"
        );
        Ok(report)
    }

    /// Make `id` the active model and ask the inference backend to load it
    ///
    /// If the backend refuses, the error is returned but `id` stays active.
    pub async fn activate(&self, id: &str) -> ModelResult<LocalModelView> {
        let local_path = match self.lifecycle.activate(id).await {
            Ok(path) => path,
            Err(e) => {
                metrics::record_activation(false);
                return Err(e);
            }
        };

        if let Err(e) = self.inference.load_model(&local_path).await {
            metrics::record_activation(false);
            tracing::error!(model_id = %id, error = %e, "Model activated but backend failed to load it");
            return Err(e);
        }

        metrics::record_activation(true);

        self.lifecycle
            .get(id)
            .await?
            .ok_or_else(|| ModelError::NotDownloaded { id: id.to_string() })
    }

    pub async fn active_model(&self) -> ModelResult<Option<LocalModelView>> {
        self.lifecycle.active().await
    }

    pub async fn local_models(&self) -> ModelResult<Vec<LocalModelView>> {
        self.lifecycle.list().await
    }

    pub async fn model_state(&self, id: &str) -> ModelResult<ModelState> {
        if let Some(view) = self.lifecycle.get(id).await? {
            return Ok(if view.active {
                ModelState::Active
            } else {
                ModelState::Downloaded
            });
        }

        if self.cache.contains(id).await? {
            Ok(ModelState::Cataloged)
        } else {
            Ok(ModelState::Unknown)
        }
    }
}
