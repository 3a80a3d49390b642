//! Model Manager - Local model catalog and lifecycle manager
//!
//! Discovers models on a Hugging Face compatible hub, caches catalog data
//! locally, downloads model artifacts and keeps track of the single model
//! that is active in the inference backend.

pub mod api;
pub mod config;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod storage;

pub use config::ManagerConfig;
pub use error::{ModelError, ModelResult};
pub use inference::{InferenceBackend, LlamaServerClient};
pub use models::{
    CacheStore, CancelToken, CatalogEntry, HubClient, LifecycleManager, LocalModelView,
    ModelMetadata, ProgressEvent,
};
pub use registry::{BulkDownloadReport, ModelState, Registry};
pub use storage::{FileSystemStorage, StorageBackend};
