//! Shared fixtures: an in-process mock hub and a recording inference backend

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Query, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use model_manager::{
    CacheStore, HubClient, InferenceBackend, LifecycleManager, ModelError, ModelResult, Registry,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// A model served by the mock hub
#[derive(Clone)]
pub struct MockModel {
    pub id: String,
    pub sha: String,
    pub pipeline: String,
    pub files: Vec<(String, Vec<u8>)>,
    pub config: Option<Value>,
}

impl MockModel {
    pub fn new(id: &str, sha: &str, pipeline: &str) -> Self {
        Self {
            id: id.to_string(),
            sha: sha.to_string(),
            pipeline: pipeline.to_string(),
            files: Vec::new(),
            config: None,
        }
    }

    pub fn file(mut self, name: &str, content: &[u8]) -> Self {
        self.files.push((name.to_string(), content.to_vec()));
        self
    }

    pub fn config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }
}

#[derive(Default)]
pub struct HubState {
    models: Mutex<Vec<MockModel>>,
    /// Artifact filename that answers 500 while set
    failing_file: Mutex<Option<String>>,
    /// Artifact filename whose body is cut off halfway while set
    truncated_file: Mutex<Option<String>>,
    total_count: Mutex<Option<u64>>,
    api_calls: AtomicUsize,
    artifact_calls: AtomicUsize,
}

/// Hugging Face compatible hub served on a loopback port
pub struct MockHub {
    pub url: String,
    pub state: Arc<HubState>,
}

impl MockHub {
    pub async fn start(models: Vec<MockModel>) -> Self {
        let state = Arc::new(HubState {
            models: Mutex::new(models),
            total_count: Mutex::new(Some(1_234_567)),
            ..Default::default()
        });

        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            state,
        }
    }

    pub fn fail_file(&self, filename: Option<&str>) {
        *self.state.failing_file.lock().unwrap() = filename.map(str::to_string);
    }

    pub fn truncate_file(&self, filename: Option<&str>) {
        *self.state.truncated_file.lock().unwrap() = filename.map(str::to_string);
    }

    pub fn set_total_count(&self, total: Option<u64>) {
        *self.state.total_count.lock().unwrap() = total;
    }

    /// Replace a model's revision, e.g. to simulate an upstream update
    pub fn update_model(&self, model: MockModel) {
        let mut models = self.state.models.lock().unwrap();
        models.retain(|m| m.id != model.id);
        models.push(model);
    }

    /// Metadata API calls served so far (listing, detail, stats, config)
    pub fn api_calls(&self) -> usize {
        self.state.api_calls.load(Ordering::SeqCst)
    }

    pub fn artifact_calls(&self) -> usize {
        self.state.artifact_calls.load(Ordering::SeqCst)
    }
}

fn find(state: &HubState, id: &str) -> Option<MockModel> {
    state
        .models
        .lock()
        .unwrap()
        .iter()
        .find(|m| m.id == id)
        .cloned()
}

async fn handle(
    State(state): State<Arc<HubState>>,
    Query(query): Query<HashMap<String, String>>,
    uri: Uri,
) -> Response {
    let path = uri.path();

    if path == "/api/models" {
        state.api_calls.fetch_add(1, Ordering::SeqCst);
        if query.contains_key("limit") {
            let mut response = Json(json!([])).into_response();
            if let Some(total) = *state.total_count.lock().unwrap() {
                response
                    .headers_mut()
                    .insert("x-total-count", total.to_string().parse().unwrap());
            }
            return response;
        }

        let pipeline = query.get("pipeline_tag").cloned().unwrap_or_default();
        let listing: Vec<Value> = state
            .models
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.pipeline == pipeline)
            .map(|m| {
                json!({
                    "id": m.id,
                    "lastModified": "2024-05-01T00:00:00.000Z",
                    "downloads": 100,
                    "tags": [m.pipeline],
                })
            })
            .collect();
        return Json(listing).into_response();
    }

    if let Some(id) = path.strip_prefix("/api/models/") {
        state.api_calls.fetch_add(1, Ordering::SeqCst);
        let Some(model) = find(&state, id) else {
            return (StatusCode::NOT_FOUND, "Repository not found").into_response();
        };
        let siblings: Vec<Value> = model
            .files
            .iter()
            .map(|(name, bytes)| json!({"rfilename": name, "size": bytes.len()}))
            .collect();
        return Json(json!({
            "id": model.id,
            "lastModified": "2024-05-01T00:00:00.000Z",
            "downloads": 100,
            "tags": [model.pipeline],
            "sha": model.sha,
            "cardData": {"license": "apache-2.0", "description": "Mock model"},
            "siblings": siblings,
        }))
        .into_response();
    }

    if let Some(id) = path
        .strip_prefix('/')
        .and_then(|p| p.strip_suffix("/raw/main/config.json"))
    {
        state.api_calls.fetch_add(1, Ordering::SeqCst);
        return match find(&state, id).and_then(|m| m.config) {
            Some(config) => Json(config).into_response(),
            None => (StatusCode::NOT_FOUND, "Entry not found").into_response(),
        };
    }

    if let Some((id, filename)) = path
        .strip_prefix('/')
        .and_then(|p| p.split_once("/resolve/main/"))
    {
        state.artifact_calls.fetch_add(1, Ordering::SeqCst);
        let filename = urlencoding::decode(filename).unwrap().into_owned();

        if state.failing_file.lock().unwrap().as_deref() == Some(filename.as_str()) {
            return (StatusCode::INTERNAL_SERVER_ERROR, "storage backend offline").into_response();
        }

        let truncated = state.truncated_file.lock().unwrap().as_deref() == Some(filename.as_str());

        return match find(&state, id).and_then(|m| {
            m.files
                .into_iter()
                .find(|(name, _)| *name == filename)
                .map(|(_, bytes)| bytes)
        }) {
            Some(mut bytes) if truncated => {
                bytes.truncate(bytes.len() / 2);
                let chunks: Vec<Result<Bytes, io::Error>> = vec![
                    Ok(Bytes::from(bytes)),
                    Err(io::Error::new(io::ErrorKind::ConnectionReset, "upstream reset")),
                ];
                Body::from_stream(futures::stream::iter(chunks)).into_response()
            }
            Some(bytes) => bytes.into_response(),
            None => (StatusCode::NOT_FOUND, "Entry not found").into_response(),
        };
    }

    StatusCode::NOT_FOUND.into_response()
}

/// Inference backend that records load requests and can be told to fail
#[derive(Default)]
pub struct RecordingBackend {
    pub loaded: Mutex<Vec<PathBuf>>,
    pub fail: AtomicBool,
}

impl RecordingBackend {
    pub fn loaded(&self) -> Vec<PathBuf> {
        self.loaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceBackend for RecordingBackend {
    async fn load_model(&self, path: &Path) -> ModelResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ModelError::InferenceLoadFailed {
                path: path.display().to_string(),
                message: "model file rejected".to_string(),
            });
        }
        self.loaded.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// Registry wired to `hub_url` with all state under `dir`
pub fn registry_at(hub_url: &str, dir: &Path, backend: Arc<RecordingBackend>) -> Registry {
    let client = HubClient::new(hub_url, Duration::from_secs(5)).unwrap();
    Registry::new(
        Arc::new(client),
        CacheStore::new(dir.join("cache.json")),
        LifecycleManager::new(dir.join("state.json")),
        dir.join("models"),
        backend,
    )
}

pub struct Fixture {
    pub hub: MockHub,
    pub dir: TempDir,
    pub backend: Arc<RecordingBackend>,
    pub registry: Arc<Registry>,
}

impl Fixture {
    pub async fn new(models: Vec<MockModel>) -> Self {
        let hub = MockHub::start(models).await;
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::default());
        let registry = Arc::new(registry_at(&hub.url, dir.path(), backend.clone()));
        Self {
            hub,
            dir,
            backend,
            registry,
        }
    }

    /// A second registry over the same files whose hub is unreachable
    pub fn offline_registry(&self) -> Registry {
        registry_at("http://127.0.0.1:9", self.dir.path(), self.backend.clone())
    }

    pub fn models_dir(&self) -> PathBuf {
        self.dir.path().join("models")
    }
}

/// Three-file model used by the download scenarios
pub fn three_file_model(id: &str, sha: &str) -> MockModel {
    MockModel::new(id, sha, "text-generation")
        .file("config.json", br#"{"model_type": "llama"}"#)
        .file("tokenizer.json", b"{}")
        .file("model-q4.gguf", &[7u8; 4096])
}
