//! BGE-M3 dense embeddings computed locally with candle.
//!
//! The model directory must contain `tokenizer.json`, `config.json` and
//! either `model.safetensors` or `pytorch_model.bin`.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use ragidx_core::config::EmbeddingConfig;
use ragidx_core::{Embedder, Error};

use crate::device::{device_label, select_device};
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

pub struct BgeEmbedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    name: String,
    dim: usize,
    max_len: usize,
}

impl BgeEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let device = select_device(config.device)?;
        let model_dir = resolve_model_dir(config.model_dir.as_deref())?;
        info!(
            model_dir = %model_dir.display(),
            device = device_label(&device),
            "loading BGE-M3"
        );

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            anyhow!(
                "Failed to load tokenizer from {}: {}",
                tokenizer_path.display(),
                e
            )
        })?;

        let config_path = model_dir.join("config.json");
        let model_config: XLMRobertaConfig =
            serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;

        let weights = load_weights(&model_dir, &device)?;
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&model_config, vb)?;
        let dim = model_config.hidden_size;
        if dim != config.dimension {
            return Err(anyhow!(
                "model hidden size {} does not match configured embedding.dimension {}",
                dim,
                config.dimension
            ));
        }
        info!(dim, "BGE-M3 model loaded");

        Ok(Self {
            model,
            tokenizer,
            device,
            name: config.model.clone(),
            dim,
            max_len: config.max_len.max(1),
        })
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let (input_ids, attention_mask) =
            tokenize_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.model.forward(
            &input_ids,
            &attention_mask,
            &token_type_ids,
            None,
            None,
            None,
        )?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let rows: Vec<Vec<f32>> = pooled
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F32)?
            .to_vec2()?;
        debug!(
            batch = texts.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "embedded batch"
        );
        Ok(rows)
    }
}

impl Embedder for BgeEmbedder {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn embed_batch(&self, texts: &[String]) -> ragidx_core::Result<Vec<Vec<f32>>> {
        self.embed_texts(texts).map_err(|e| Error::Embedding(format!("{e:#}")))
    }
}

fn load_weights(model_dir: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        debug!(path = %safetensors.display(), "reading safetensors weights");
        return Ok(candle_core::safetensors::load(&safetensors, device)?);
    }
    let pickle = model_dir.join("pytorch_model.bin");
    if pickle.exists() {
        debug!(path = %pickle.display(), "reading pytorch weights");
        let tensors = candle_core::pickle::read_all(&pickle)?;
        return Ok(tensors.into_iter().collect());
    }
    Err(anyhow!(
        "no model.safetensors or pytorch_model.bin in {}",
        model_dir.display()
    ))
}

/// Finds the model directory: explicit config first, then `APP_MODEL_DIR` /
/// `MODEL_DIR`, then the conventional `models/bge-m3` locations.
pub fn resolve_model_dir(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = configured {
        if p.exists() {
            return Ok(p.to_path_buf());
        }
        return Err(anyhow!("configured model_dir {} does not exist", p.display()));
    }
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            let p = PathBuf::from(dir);
            if p.exists() {
                return Ok(p);
            }
        }
    }
    for candidate in ["models/bge-m3", "../models/bge-m3"] {
        let p = Path::new(candidate);
        if p.exists() {
            return Ok(p.to_path_buf());
        }
    }
    Err(anyhow!("Could not locate BGE-M3 model directory"))
}
