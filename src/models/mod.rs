//! Model catalog and local lifecycle
//!
//! Provides functionality for:
//! - Querying the remote hub catalog (listings, detail, stats)
//! - Deriving compatibility metadata from file lists and config.json
//! - Caching catalog data on disk
//! - Downloading model artifacts with per-file progress
//! - Tracking downloaded models and the single active one

pub mod cache;
pub mod catalog;
pub mod download;
pub mod lifecycle;
pub mod metadata;

pub use cache::CacheStore;
pub use catalog::{ArtifactFile, CatalogEntry, GlobalStats, HubClient, ModelDetail};
pub use download::{CancelToken, DownloadOutcome, Downloader, ProgressEvent, validate_model_id};
pub use lifecycle::{LifecycleManager, LifecycleState, LocalModelRecord, LocalModelView};
pub use metadata::{ConfigDocument, ModelMetadata, enrich};
