//! Remote catalog client
//!
//! Talks to a Hugging Face compatible hub and translates its JSON schemas
//! into catalog records:
//! ```text
//! GET {endpoint}/api/models?pipeline_tag=<pipeline>   -> listing
//! GET {endpoint}/api/models/<id>?blobs=true           -> detail + file list
//! GET {endpoint}/api/models?limit=1                   -> X-Total-Count header
//! GET {endpoint}/<id>/raw/main/config.json            -> architecture config
//! GET {endpoint}/<id>/resolve/main/<file>             -> artifact bytes
//! ```

use super::metadata::ConfigDocument;
use crate::error::{ModelError, ModelResult};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default public hub endpoint
pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";

/// Header carrying the total number of models on a listing response
const TOTAL_COUNT_HEADER: &str = "x-total-count";

/// Summary record returned by listing queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub last_modified: String,
    pub downloads: u64,
    pub tags: Vec<String>,
}

/// A single file belonging to a model revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    /// Path of the file inside the repository
    pub filename: String,
    /// Size in bytes, when the registry reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Revision and file list for one model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDetail {
    #[serde(flatten)]
    pub entry: CatalogEntry,
    /// Registry revision identifier, used as the local version marker
    pub content_hash: String,
    pub files: Vec<ArtifactFile>,
    /// License declared in the registry's card data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_license: Option<String>,
    /// Free-text description from the registry's card data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_description: Option<String>,
}

impl ModelDetail {
    pub fn id(&self) -> &str {
        &self.entry.id
    }
}

/// Hub-wide statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_models: u64,
}

// ----------------------------------------------------------------------------
// Wire formats
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawListing {
    id: String,
    #[serde(rename = "lastModified", default)]
    last_modified: String,
    #[serde(default)]
    downloads: u64,
    #[serde(default)]
    tags: Vec<String>,
}

impl From<RawListing> for CatalogEntry {
    fn from(raw: RawListing) -> Self {
        Self {
            id: raw.id,
            last_modified: raw.last_modified,
            downloads: raw.downloads,
            tags: raw.tags,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDetail {
    id: String,
    #[serde(rename = "lastModified", default)]
    last_modified: String,
    #[serde(default)]
    downloads: u64,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    sha: String,
    #[serde(rename = "cardData", default)]
    card_data: Option<RawCardData>,
    #[serde(default)]
    siblings: Vec<RawSibling>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCardData {
    /// Either a single SPDX id or a list of them
    #[serde(default)]
    license: Option<serde_json::Value>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSibling {
    rfilename: String,
    #[serde(default)]
    size: Option<u64>,
}

fn license_text(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s),
        serde_json::Value::Array(items) => {
            let joined = items
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            (!joined.is_empty()).then_some(joined)
        }
        _ => None,
    }
}

impl From<RawDetail> for ModelDetail {
    fn from(raw: RawDetail) -> Self {
        let card = raw.card_data.unwrap_or_default();
        Self {
            entry: CatalogEntry {
                id: raw.id,
                last_modified: raw.last_modified,
                downloads: raw.downloads,
                tags: raw.tags,
            },
            content_hash: raw.sha,
            files: raw
                .siblings
                .into_iter()
                .map(|s| ArtifactFile {
                    filename: s.rfilename,
                    size: s.size,
                })
                .collect(),
            card_license: card.license.and_then(license_text),
            card_description: card.description.filter(|d| !d.trim().is_empty()),
        }
    }
}

// ----------------------------------------------------------------------------
// Client
// ----------------------------------------------------------------------------

/// HTTP client for the remote model hub
#[derive(Clone)]
pub struct HubClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HubClient {
    /// Create a client for `endpoint` (e.g. "https://huggingface.co")
    ///
    /// `timeout` bounds connection setup, each metadata call and every read
    /// of an artifact body, so a stalled transfer fails instead of hanging.
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// List models tagged with a pipeline category
    pub async fn list_by_pipeline(&self, pipeline: &str) -> ModelResult<Vec<CatalogEntry>> {
        let url = format!("{}/api/models", self.endpoint);
        tracing::debug!(pipeline = %pipeline, url = %url, "Listing models");

        let request = self.get(&url).query(&[("pipeline_tag", pipeline)]);
        let listing: Vec<RawListing> = decode(self.send(request, &url).await?, &url).await?;

        Ok(listing.into_iter().map(CatalogEntry::from).collect())
    }

    /// Fetch revision and file list for one model
    pub async fn fetch_detail(&self, id: &str) -> ModelResult<ModelDetail> {
        let url = format!("{}/api/models/{}", self.endpoint, id);
        tracing::debug!(model_id = %id, url = %url, "Fetching model detail");

        let request = self.get(&url).query(&[("blobs", "true")]);
        let raw: RawDetail = decode(self.send(request, &url).await?, &url).await?;

        Ok(raw.into())
    }

    /// Read the hub-wide model count from a limit-1 listing
    pub async fn fetch_global_stats(&self) -> ModelResult<GlobalStats> {
        let url = format!("{}/api/models", self.endpoint);
        let request = self.get(&url).query(&[("limit", "1")]);
        let response = self.send(request, &url).await?;

        let total_models = response
            .headers()
            .get(TOTAL_COUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or(ModelError::StatsUnavailable)?;

        Ok(GlobalStats { total_models })
    }

    /// Best-effort fetch of the model's config.json
    ///
    /// Any failure downgrades to `None` ("architecture unknown").
    pub async fn fetch_secondary_config(&self, id: &str) -> Option<ConfigDocument> {
        let url = format!("{}/{}/raw/main/config.json", self.endpoint, id);

        let result = match self.send(self.get(&url), &url).await {
            Ok(response) => decode::<ConfigDocument>(response, &url).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!(model_id = %id, error = %e, "config.json unavailable, architecture unknown");
                None
            }
        }
    }

    /// URL of a single artifact at the main revision
    pub fn artifact_url(&self, id: &str, filename: &str) -> String {
        let encoded = filename
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}/resolve/main/{}", self.endpoint, id, encoded)
    }

    /// Open a streaming response for one artifact
    pub async fn fetch_artifact(&self, id: &str, filename: &str) -> ModelResult<Response> {
        let url = self.artifact_url(id, filename);
        self.send(self.http.get(&url), &url).await
    }

    /// Metadata request bounded by the client timeout
    fn get(&self, url: &str) -> RequestBuilder {
        self.http.get(url).timeout(self.timeout)
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> ModelResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| ModelError::unavailable(url, &e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ModelError::RegistryError {
            status: status.as_u16(),
            body,
        })
    }
}

async fn decode<T: DeserializeOwned>(response: Response, url: &str) -> ModelResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| ModelError::InvalidResponse(format!("{}: {}", url, e)))
}
