//! Model metadata enrichment
//!
//! Derives format and compatibility flags from a model's file list and its
//! optional config.json. Enrichment is a pure function: the same detail and
//! config always produce the same metadata.

use super::catalog::{ArtifactFile, ModelDetail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Backend tag every model is compatible with
pub const GENERIC_BACKEND: &str = "transformers";

/// Architecture keyword marking llama-family models
const LLAMA_FAMILY: &str = "llama";

/// Architecture description taken from a model's config.json
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "RawConfig")]
pub struct ConfigDocument {
    /// Architecture class names (e.g. "LlamaForCausalLM")
    pub architectures: Vec<String>,
    /// Architecture family (e.g. "llama", "gpt2")
    pub model_type: Option<String>,
    pub hidden_size: Option<u32>,
    pub layer_count: Option<u32>,
    pub attention_heads: Option<u32>,
    pub license: Option<String>,
}

/// Raw config.json structure (partial)
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    architectures: Vec<String>,
    model_type: Option<String>,
    hidden_size: Option<u32>,
    n_layer: Option<u32>,
    num_attention_heads: Option<u32>,
    license: Option<serde_json::Value>,
    // Some models use different names
    d_model: Option<u32>,
    n_embd: Option<u32>,
    num_hidden_layers: Option<u32>,
    n_head: Option<u32>,
}

impl From<RawConfig> for ConfigDocument {
    fn from(raw: RawConfig) -> Self {
        Self {
            architectures: raw.architectures,
            model_type: raw.model_type,
            hidden_size: raw.hidden_size.or(raw.d_model).or(raw.n_embd),
            layer_count: raw.n_layer.or(raw.num_hidden_layers),
            attention_heads: raw.num_attention_heads.or(raw.n_head),
            license: raw
                .license
                .and_then(|v| v.as_str().map(str::to_string))
                .filter(|l| !l.is_empty()),
        }
    }
}

/// Enriched single-model record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    #[serde(flatten)]
    pub detail: ModelDetail,

    /// Usable with llama tooling (by id or by architecture)
    pub llama_compatible: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture_family: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub architectures: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention_heads: Option<u32>,

    pub is_quantized: bool,
    pub has_gguf: bool,
    pub has_safetensors: bool,
    pub compatible_backends: BTreeSet<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_card: Option<String>,

    /// Sum of all reported artifact sizes in bytes
    pub total_download_bytes: u64,
}

impl ModelMetadata {
    pub fn id(&self) -> &str {
        self.detail.id()
    }
}

/// Format recognized from a single filename
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtifactFormat {
    Gguf,
    Gptq,
    Safetensors,
    Onnx,
    Other,
}

/// Classify a filename; the first matching rule wins
fn classify(filename: &str) -> ArtifactFormat {
    let name = filename.to_lowercase();
    if name.ends_with(".gguf") {
        ArtifactFormat::Gguf
    } else if name.contains("gptq") {
        ArtifactFormat::Gptq
    } else if name.ends_with(".safetensors") {
        ArtifactFormat::Safetensors
    } else if name.ends_with(".onnx") {
        ArtifactFormat::Onnx
    } else {
        ArtifactFormat::Other
    }
}

fn mentions_llama(text: &str) -> bool {
    text.to_lowercase().contains(LLAMA_FAMILY)
}

/// Derive the enriched record from a detail and an optional config document
pub fn enrich(detail: &ModelDetail, config: Option<&ConfigDocument>) -> ModelMetadata {
    let mut metadata = ModelMetadata {
        detail: detail.clone(),
        llama_compatible: false,
        architecture_family: None,
        architectures: Vec::new(),
        hidden_size: None,
        layer_count: None,
        attention_heads: None,
        is_quantized: false,
        has_gguf: false,
        has_safetensors: false,
        compatible_backends: BTreeSet::from([GENERIC_BACKEND.to_string()]),
        license: detail.card_license.clone(),
        model_card: detail.card_description.clone(),
        total_download_bytes: total_bytes(&detail.files),
    };

    for file in &detail.files {
        match classify(&file.filename) {
            ArtifactFormat::Gguf => {
                metadata.has_gguf = true;
                metadata.compatible_backends.insert("gguf".to_string());
            }
            ArtifactFormat::Gptq => {
                metadata.is_quantized = true;
                metadata.compatible_backends.insert("gptq".to_string());
            }
            ArtifactFormat::Safetensors => metadata.has_safetensors = true,
            ArtifactFormat::Onnx => {
                metadata.compatible_backends.insert("onnx".to_string());
            }
            ArtifactFormat::Other => {}
        }
    }

    if let Some(config) = config {
        metadata.architecture_family = config.model_type.clone();
        metadata.architectures = config.architectures.clone();
        metadata.hidden_size = config.hidden_size;
        metadata.layer_count = config.layer_count;
        metadata.attention_heads = config.attention_heads;

        metadata.llama_compatible = config.architectures.iter().any(|a| mentions_llama(a))
            || config.model_type.as_deref().is_some_and(mentions_llama);

        if metadata.license.is_none() {
            metadata.license = config.license.clone();
        }
    }

    // Id-based detection is independent of the config
    if mentions_llama(detail.id()) {
        metadata.llama_compatible = true;
    }

    metadata
}

fn total_bytes(files: &[ArtifactFile]) -> u64 {
    files.iter().map(|f| f.size.unwrap_or(0)).sum()
}
