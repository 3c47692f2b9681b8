//! Embedding providers for the vector side of the engine.
//!
//! `HashingEmbedder` is deterministic and model-free; `LocalModelEmbedder` runs
//! an XLM-RoBERTa checkpoint (BGE-M3 layout) through candle. Both return
//! L2-normalized vectors of a fixed dimension.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};
use twox_hash::XxHash64;

use stash_core::config::{resolve_with_base, EmbeddingProviderKind, EmbeddingSettings};
use stash_core::error::{Error, Result};
use stash_core::traits::{EmbedMode, Embedder};

pub mod device;
pub mod pool;
pub mod tokenize;

pub use pool::masked_mean_l2;

/// Feature-hashing embedder: each lower-cased alphanumeric token bumps one
/// signed bucket chosen by xxHash64. Same text, same vector.
pub struct HashingEmbedder {
    dim: usize,
    id: String,
}

impl HashingEmbedder {
    /// Fails with `InvalidConfig` for a zero dimension.
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidConfig("hashing embedder dimension must be positive".into()));
        }
        Ok(Self { dim, id: format!("hashing:d{dim}") })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let lowered = text.to_lowercase();
        let tokens = lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty());
        let mut seen_any = false;
        for token in tokens {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
            seen_any = true;
        }
        if !seen_any {
            v[0] = 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl Embedder for HashingEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String], _mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Transformer embedder with masked mean pooling.
///
/// Query mode prepends `query_instruction` to the text; without one the model
/// is treated as symmetric and `supports_query_mode` is false.
pub struct LocalModelEmbedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    max_len: usize,
    query_instruction: Option<String>,
    id: String,
}

impl LocalModelEmbedder {
    pub fn load(model_dir: &Path, max_len: usize, query_instruction: Option<String>) -> Result<Self> {
        let device = device::select_device();
        info!(dir = %model_dir.display(), "loading embedding model");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::InvalidConfig(format!("Failed to load tokenizer from {}: {e}", tokenizer_path.display())))?;
        let config_path = model_dir.join("config.json");
        let config_text = std::fs::read_to_string(&config_path)
            .map_err(|e| Error::InvalidConfig(format!("Failed to read {}: {e}", config_path.display())))?;
        let config: XLMRobertaConfig = serde_json::from_str(&config_text)
            .map_err(|e| Error::InvalidConfig(format!("Invalid model config {}: {e}", config_path.display())))?;
        let dim = config.hidden_size;
        let weights_path = model_dir.join("pytorch_model.bin");
        let weights = candle_core::pickle::read_all(&weights_path).map_err(Error::backend)?;
        let weights_map: HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb).map_err(Error::backend)?;
        let name = model_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "model".into());
        info!(dim, "embedding model loaded");
        Ok(Self { model, tokenizer, device, dim, max_len, query_instruction, id: format!("local:{name}:d{dim}") })
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize::tokenize_on_device(&self.tokenizer, text, self.max_len, &self.device)?;
        let token_type_ids = Tensor::zeros((1, self.max_len), DType::I64, &self.device).map_err(Error::backend)?;
        let hidden = self
            .model
            .forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)
            .map_err(Error::backend)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask).map_err(Error::backend)?;
        let emb: Vec<f32> = pooled
            .to_device(&Device::Cpu)
            .and_then(|t| t.squeeze(0))
            .and_then(|t| t.to_vec1())
            .map_err(Error::backend)?;
        if emb.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: emb.len() });
        }
        let elapsed = start.elapsed().as_millis();
        if elapsed > 100 {
            warn!(elapsed_ms = elapsed, "slow embedding");
        }
        Ok(emb)
    }
}

impl Embedder for LocalModelEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn supports_query_mode(&self) -> bool {
        self.query_instruction.is_some()
    }

    fn embed_batch(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        let prefix = match (mode, &self.query_instruction) {
            (EmbedMode::Query, Some(instruction)) => Some(instruction.as_str()),
            _ => None,
        };
        texts
            .iter()
            .map(|t| match prefix {
                Some(p) => self.embed_one(&format!("{p}{t}")),
                None => self.embed_one(t),
            })
            .collect()
    }
}

/// Build the configured provider.
///
/// `APP_USE_FAKE_EMBEDDINGS=1` forces the hashing provider regardless of
/// settings, for fast deterministic runs in tests and development.
pub fn embedder_from_settings(settings: &EmbeddingSettings, base_dir: &Path) -> Result<Arc<dyn Embedder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if use_fake || settings.provider == EmbeddingProviderKind::Hashing {
        debug!(dim = settings.dim, "using hashing embedder");
        return Ok(Arc::new(HashingEmbedder::new(settings.dim)?));
    }
    let model_dir = resolve_model_dir(settings, base_dir)?;
    let embedder = LocalModelEmbedder::load(&model_dir, settings.max_len, settings.query_instruction.clone())?;
    if embedder.dim() != settings.dim {
        return Err(Error::DimensionMismatch { expected: settings.dim, actual: embedder.dim() });
    }
    Ok(Arc::new(embedder))
}

fn resolve_model_dir(settings: &EmbeddingSettings, base_dir: &Path) -> Result<PathBuf> {
    let candidates = settings
        .model_dir
        .iter()
        .cloned()
        .chain(std::env::var("APP_MODEL_DIR").ok())
        .chain(std::env::var("MODEL_DIR").ok())
        .chain(std::iter::once("models/bge-m3".to_string()));
    for candidate in candidates {
        let p = resolve_with_base(base_dir, &candidate);
        if p.exists() {
            return Ok(p);
        }
    }
    Err(Error::InvalidConfig("Could not locate embedding model directory".into()))
}
