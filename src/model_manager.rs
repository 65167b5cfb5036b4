use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use serde::Deserialize;
use tokenizers::{
    PaddingParams,
    PaddingStrategy,
    Tokenizer,
    TruncationParams,
};
use tracing::info;

use crate::{
    embedding::{Embedder, EmbeddingMatrix},
    error::{Error, Result},
    hash_embedder::HashEmbedder,
};

pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const MODEL_ENV_VAR: &str = "DOCSIFT_MODEL";

/// Longest token sequence fed to the encoder; longer inputs are truncated.
const MAX_SEQUENCE_LENGTH: usize = 256;

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

#[derive(Debug, Deserialize)]
struct EncoderShape {
    hidden_size: usize,
}

/// A BERT-family sentence encoder: mean pooling over non-padding tokens
/// followed by L2 normalization.
struct SentenceModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl SentenceModel {
    fn load(model_id: &str) -> Result<Self> {
        let files = ModelFiles::resolve(model_id)?;
        let device = default_device();

        let config_json = std::fs::read_to_string(&files.config)?;
        let shape: EncoderShape = serde_json::from_str(&config_json)?;
        let config: BertConfig = serde_json::from_str(&config_json)?;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| Error::Model(format!("failed to load tokenizer: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| Error::Model(format!("invalid truncation: {e}")))?;

        // SAFETY: the weights file is only read while mapped and is not
        // modified by this process.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(
                &[files.weights],
                DType::F32,
                &device,
            )?
        };
        let model = BertModel::load(vb, &config)?;

        info!(
            model = model_id,
            dimension = shape.hidden_size,
            "loaded sentence embedding model"
        );

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension: shape.hidden_size,
        })
    }

    fn encode(&self, texts: &[String]) -> Result<EmbeddingMatrix> {
        if texts.is_empty() {
            return Ok(EmbeddingMatrix::empty(self.dimension));
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::Model(format!("tokenization failed: {e}")))?;

        let ids = encodings
            .iter()
            .map(|e| Tensor::new(e.get_ids(), &self.device))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let masks = encodings
            .iter()
            .map(|e| Tensor::new(e.get_attention_mask(), &self.device))
            .collect::<candle_core::Result<Vec<_>>>()?;

        let input_ids = Tensor::stack(&ids, 0)?;
        let attention_mask = Tensor::stack(&masks, 0)?;
        let token_type_ids = input_ids.zeros_like()?;

        // [batch, tokens, hidden]
        let hidden = self.model.forward(
            &input_ids,
            &token_type_ids,
            Some(&attention_mask),
        )?;

        let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1e-9f32, f32::MAX)?;
        let mean = summed.broadcast_div(&counts)?;
        let norms = mean.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-12f32, f32::MAX)?;
        let normalized = mean.broadcast_div(&norms)?;

        let data = normalized.flatten_all()?.to_vec1::<f32>()?;
        EmbeddingMatrix::from_flat(texts.len(), self.dimension, data)
    }
}

/// Paths of the three files a sentence model needs.
struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

impl ModelFiles {
    /// Local directories are used as-is; anything else is fetched from
    /// the HuggingFace Hub (cached after the first download).
    fn resolve(model_id: &str) -> Result<Self> {
        let local = Path::new(model_id);
        if local.is_dir() {
            return Ok(Self {
                config: local.join("config.json"),
                tokenizer: local.join("tokenizer.json"),
                weights: local.join("model.safetensors"),
            });
        }

        let api = hf_hub::api::sync::Api::new()
            .map_err(|e| Error::Model(format!("hub client: {e}")))?;
        let repo = api.model(model_id.to_string());
        let fetch = |name: &str| {
            repo.get(name).map_err(|e| {
                Error::Model(format!("failed to fetch {model_id}/{name}: {e}"))
            })
        };

        Ok(Self {
            config: fetch("config.json")?,
            tokenizer: fetch("tokenizer.json")?,
            weights: fetch("model.safetensors")?,
        })
    }
}

enum Backend {
    Sentence(SentenceModel),
    Hash(HashEmbedder),
}

/// Owns the active embedding function, loading it lazily on first use.
///
/// The same `ModelManager` configuration must be used to build an index
/// and to query it; [`crate::index_store::Index::load`] checks the width.
pub struct ModelManager {
    backend: Option<Backend>,
    model_id: String,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelManager {
    /// Creates a new `ModelManager`. The model ID is resolved from:
    /// 1. The `DOCSIFT_MODEL` environment variable, if set
    /// 2. Otherwise, the default model (`sentence-transformers/all-MiniLM-L6-v2`)
    ///
    /// A model ID of the form `hash:<D>` selects the offline
    /// [`HashEmbedder`] instead of a neural model.
    pub fn new() -> Self {
        let model_id = std::env::var(MODEL_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());
        Self::with_model_id(model_id)
    }

    /// Creates a `ModelManager` with an explicit model ID, bypassing
    /// environment variable resolution.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            backend: None,
            model_id,
        }
    }

    /// Resolve from an optional override (e.g. `--model`), falling back
    /// to [`ModelManager::new`].
    pub fn resolve(explicit: Option<&str>) -> Self {
        match explicit {
            Some(id) => Self::with_model_id(id.to_string()),
            None => Self::new(),
        }
    }

    /// Returns `true` if the backend has already been loaded.
    pub fn is_loaded(&self) -> bool {
        self.backend.is_some()
    }

    fn ensure_loaded(&mut self) -> Result<&mut Backend> {
        if self.backend.is_none() {
            let backend = match HashEmbedder::from_model_id(&self.model_id)? {
                Some(hash) => Backend::Hash(hash),
                None => Backend::Sentence(SentenceModel::load(&self.model_id)?),
            };
            self.backend = Some(backend);
        }

        self.backend
            .as_mut()
            .ok_or_else(|| Error::Model("model failed to load".into()))
    }
}

impl Embedder for ModelManager {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&mut self) -> Result<usize> {
        match self.ensure_loaded()? {
            Backend::Sentence(model) => Ok(model.dimension),
            Backend::Hash(hash) => hash.dimension(),
        }
    }

    fn embed(&mut self, texts: &[String]) -> Result<EmbeddingMatrix> {
        match self.ensure_loaded()? {
            Backend::Sentence(model) => model.encode(texts),
            Backend::Hash(hash) => hash.embed(texts),
        }
    }
}
