//! Embeddings from an OpenAI-compatible `/embeddings` endpoint.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use ragidx_core::config::EmbeddingConfig;
use ragidx_core::{Embedder, Error};

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingRow {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub index: Option<usize>,
}

pub struct RemoteEmbedder {
    http: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    dim: usize,
}

impl RemoteEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow!("embedding.endpoint is required for the remote backend"))?;
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("building HTTP client")?;
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        Ok(Self {
            http,
            url: embeddings_url(endpoint),
            model: config.model.clone(),
            api_key,
            dim: config.dimension,
        })
    }

    fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut request = self
            .http
            .post(&self.url)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        let response = request.send().with_context(|| format!("POST {}", self.url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("embeddings endpoint returned {}: {}", status, body));
        }
        let parsed: EmbeddingResponse = response.json().context("decoding embeddings response")?;
        debug!(batch = texts.len(), "remote embeddings received");
        parse_response(parsed, texts.len())
    }
}

impl Embedder for RemoteEmbedder {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn embed_batch(&self, texts: &[String]) -> ragidx_core::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).map_err(|e| Error::Embedding(format!("{e:#}")))
    }
}

/// Appends `/embeddings` unless the endpoint already names it.
pub fn embeddings_url(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    if trimmed.ends_with("/embeddings") {
        trimmed.to_string()
    } else {
        format!("{}/embeddings", trimmed)
    }
}

/// Orders rows by their `index` field and checks the count.
pub fn parse_response(response: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    if response.data.len() != expected {
        return Err(anyhow!(
            "expected {} embeddings, got {}",
            expected,
            response.data.len()
        ));
    }
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (pos, row) in response.data.into_iter().enumerate() {
        let i = row.index.unwrap_or(pos);
        let slot = slots
            .get_mut(i)
            .ok_or_else(|| anyhow!("embedding index {} out of range", i))?;
        if slot.replace(row.embedding).is_some() {
            return Err(anyhow!("duplicate embedding index {}", i));
        }
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| anyhow!("missing embedding for input {}", i)))
        .collect()
}
