//! Layered configuration and path helpers.
//!
//! Figment merges built-in defaults, `config.toml`, `config.<env>.toml` and
//! `APP_*` environment variables (`__` separates nested keys, e.g.
//! `APP_EMBEDDING__BATCH_SIZE=16`). Typed sections are extracted with
//! [`Config::settings`]; any other key is reachable through [`Config::get`].

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::Metric;

pub struct Config {
    figment: Figment,
}

impl Config {
    /// Loads configuration relative to the current working directory.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Loads configuration files from `dir`, applying the `RUST_ENV` overlay.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Ok(Self::load_for_env(dir, &env_name))
    }

    /// Same as [`Config::load_from`] with an explicit environment name.
    pub fn load_for_env(dir: &Path, env_name: &str) -> Self {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(dir.join("config.toml")));
        let overlay = match env_name {
            "dev" | "development" => Some("config.dev.toml"),
            "prod" | "production" => Some("config.prod.toml"),
            "test" | "testing" => Some("config.test.toml"),
            _ => None,
        };
        if let Some(name) = overlay {
            figment = figment.merge(Toml::file(dir.join(name)));
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Self { figment }
    }

    /// Wraps an explicit figment, used when callers assemble their own layers.
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::config(format!("Failed to get '{}': {}", key, e)))
    }

    /// Extracts and validates the typed settings tree.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::config(format!("Failed to extract settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Settings {
    pub chunking: ChunkingSettings,
    pub embedding: EmbeddingConfig,
    pub index: IndexSettings,
    pub retrieval: RetrievalSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if self.embedding.batch_size == 0 {
            return Err(Error::config("embedding.batch_size must be greater than zero"));
        }
        if self.embedding.dimension == 0 {
            return Err(Error::config("embedding.dimension must be greater than zero"));
        }
        let remote = self.embedding.backend == EmbeddingBackend::Remote;
        if remote && self.embedding.endpoint.is_none() {
            return Err(Error::config("embedding.endpoint is required for the remote backend"));
        }
        Ok(())
    }

    /// Expands `~`/`$VAR` in every configured path and anchors relative ones at `base`.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        self.embedding.cache_dir =
            resolve_with_base(base, self.embedding.cache_dir.to_string_lossy());
        self.embedding.model_dir = self
            .embedding
            .model_dir
            .map(|p| resolve_with_base(base, p.to_string_lossy()));
        self.index.data_dir = resolve_with_base(base, self.index.data_dir.to_string_lossy());
        self.index.output_dir = resolve_with_base(base, self.index.output_dir.to_string_lossy());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Soft upper bound on whitespace-delimited words per chunk.
    pub chunk_size: usize,
    /// Sentences repeated from the previous chunk. Counted in sentences, so
    /// it is not bounded by `chunk_size`.
    pub overlap: usize,
    pub max_workers: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 2,
            max_workers: 4,
        }
    }
}

impl ChunkingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::config("chunking.chunk_size must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Local BGE-M3 model executed with candle.
    #[default]
    Bge,
    /// Token hashing; deterministic and model-free.
    Hash,
    /// OpenAI-compatible HTTP embeddings endpoint.
    Remote,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[default]
    Auto,
    Cpu,
    Metal,
    Cuda,
}

/// Everything an embedder needs at construction time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub model_dir: Option<PathBuf>,
    /// Embeddings of the last indexed chunk list, reused by unchanged re-runs.
    pub cache_dir: PathBuf,
    pub device: DeviceKind,
    pub batch_size: usize,
    pub max_len: usize,
    pub dimension: usize,
    pub endpoint: Option<String>,
    /// Name of the environment variable holding the remote API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Bge,
            model: "BAAI/bge-m3".to_string(),
            model_dir: None,
            cache_dir: PathBuf::from(".ragidx/cache"),
            device: DeviceKind::Auto,
            batch_size: 32,
            max_len: 256,
            dimension: 1024,
            endpoint: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexSettings {
    /// Corpus root scanned by the directory loader.
    pub data_dir: PathBuf,
    /// Where the index, documents and run metadata are persisted.
    pub output_dir: PathBuf,
    pub metric: Metric,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from(".ragidx/index"),
            metric: Metric::InnerProduct,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    /// Coarse candidates fetched before re-ranking.
    pub rerank_candidates: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            rerank_candidates: 20,
        }
    }
}

/// `$VAR`/`${VAR}` then `~` expansion. Unknown variables leave the input
/// as written; the result is not canonicalised.
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let raw = input.as_ref();
    let with_vars = shellexpand::env(raw).unwrap_or(std::borrow::Cow::Borrowed(raw));
    PathBuf::from(shellexpand::tilde(&with_vars).as_ref())
}

/// [`expand_path`], then anchored at `base` unless already absolute.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() {
        p
    } else {
        base.join(p)
    }
}
