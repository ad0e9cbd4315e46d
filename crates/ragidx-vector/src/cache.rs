//! On-disk cache of the last successfully embedded chunk list.
//!
//! Two files live in the cache directory: `embeddings.safetensors` with the
//! `[N, D]` matrix and `documents.json` with the chunks plus the model,
//! dimension and a blake3 hash of the chunk list. The same hash is stored as
//! a header tensor beside the matrix, so a matrix and manifest from different
//! saves never pair up. A record is only reused when the chunk list about to
//! be indexed is identical, in order, and the embedder is the same.
//! Unreadable or inconsistent files are a miss.

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use ragidx_core::{Chunk, Error, Result};

use crate::store::{read_json, replace_all, stage_json};

pub const EMBEDDINGS_FILE: &str = "embeddings.safetensors";
pub const DOCUMENTS_FILE: &str = "documents.json";
const TENSOR_KEY: &str = "embeddings";
const HASH_KEY: &str = "content_hash";

/// blake3 over the canonical JSON encoding of the chunk list.
pub fn content_hash(chunks: &[Chunk]) -> String {
    let mut hasher = blake3::Hasher::new();
    for chunk in chunks {
        // serialising plain structs with string-keyed maps cannot fail
        let bytes = serde_json::to_vec(chunk).unwrap_or_default();
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    hasher.finalize().to_hex().to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    model: String,
    dimension: usize,
    content_hash: String,
    documents: Vec<Chunk>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub model: String,
    pub dimension: usize,
    pub content_hash: String,
    pub documents: Vec<Chunk>,
    pub embeddings: Vec<Vec<f32>>,
}

impl CacheRecord {
    /// Same embedder and exactly the same chunks in the same order.
    pub fn matches(&self, chunks: &[Chunk], model: &str, dimension: usize) -> bool {
        self.model == model
            && self.dimension == dimension
            && self.documents.len() == chunks.len()
            && self.content_hash == content_hash(chunks)
            && self.documents == chunks
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    dir: PathBuf,
}

impl EmbeddingCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn embeddings_path(&self) -> PathBuf {
        self.dir.join(EMBEDDINGS_FILE)
    }

    fn documents_path(&self) -> PathBuf {
        self.dir.join(DOCUMENTS_FILE)
    }

    pub fn load(&self) -> Option<CacheRecord> {
        let (emb_path, docs_path) = (self.embeddings_path(), self.documents_path());
        if !emb_path.exists() || !docs_path.exists() {
            debug!(dir = %self.dir.display(), "no embedding cache");
            return None;
        }
        match self.read(&emb_path, &docs_path) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "ignoring unreadable embedding cache");
                None
            }
        }
    }

    fn read(&self, emb_path: &Path, docs_path: &Path) -> Result<CacheRecord> {
        let manifest: Manifest = read_json(docs_path)?;
        let tensors =
            candle_core::safetensors::load(emb_path, &Device::Cpu).map_err(Error::index)?;

        let stored_hash = tensors
            .get(HASH_KEY)
            .ok_or_else(|| Error::index("cache file has no content hash"))?
            .to_vec1::<u8>()
            .map_err(Error::index)?;
        if stored_hash != manifest.content_hash.as_bytes() {
            return Err(Error::index(
                "cached embeddings were written for a different document list",
            ));
        }
        if content_hash(&manifest.documents) != manifest.content_hash {
            return Err(Error::index("cached documents do not match their recorded hash"));
        }

        let matrix = tensors
            .get(TENSOR_KEY)
            .ok_or_else(|| Error::index("cache file has no embeddings tensor"))?
            .to_dtype(DType::F32)
            .map_err(Error::index)?;
        let (rows, cols) = matrix.dims2().map_err(Error::index)?;
        if rows != manifest.documents.len() {
            return Err(Error::IndexMismatch {
                vectors: rows,
                chunks: manifest.documents.len(),
            });
        }
        if cols != manifest.dimension {
            return Err(Error::DimensionMismatch {
                expected: manifest.dimension,
                actual: cols,
            });
        }
        let embeddings = matrix.to_vec2::<f32>().map_err(Error::index)?;
        Ok(CacheRecord {
            model: manifest.model,
            dimension: manifest.dimension,
            content_hash: manifest.content_hash,
            documents: manifest.documents,
            embeddings,
        })
    }

    /// Replaces the cache with `chunks`/`embeddings`. Both files are staged
    /// first and swapped in together; on failure the previous cache stays.
    pub fn save(&self, chunks: &[Chunk], embeddings: &[Vec<f32>], model: &str) -> Result<()> {
        if chunks.len() != embeddings.len() {
            return Err(Error::IndexMismatch {
                vectors: embeddings.len(),
                chunks: chunks.len(),
            });
        }
        let Some(first) = embeddings.first() else {
            return Ok(());
        };
        let dimension = first.len();
        let mut flat = Vec::with_capacity(embeddings.len() * dimension);
        for row in embeddings {
            if row.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: row.len(),
                });
            }
            flat.extend_from_slice(row);
        }

        let (emb_path, docs_path) = (self.embeddings_path(), self.documents_path());
        fs::create_dir_all(&self.dir)?;
        let hash = content_hash(chunks);

        let staged_emb = tempfile::NamedTempFile::new_in(&self.dir)?;
        let matrix = Tensor::from_vec(flat, (embeddings.len(), dimension), &Device::Cpu)
            .map_err(Error::index)?;
        let hash_bytes = hash.as_bytes().to_vec();
        let hash_len = hash_bytes.len();
        let hash_tensor =
            Tensor::from_vec(hash_bytes, hash_len, &Device::Cpu).map_err(Error::index)?;
        let tensors: HashMap<String, Tensor> = HashMap::from([
            (TENSOR_KEY.to_string(), matrix),
            (HASH_KEY.to_string(), hash_tensor),
        ]);
        candle_core::safetensors::save(&tensors, staged_emb.path()).map_err(Error::index)?;

        let manifest = Manifest {
            model: model.to_string(),
            dimension,
            content_hash: hash,
            documents: chunks.to_vec(),
        };
        let staged_docs = stage_json(&manifest, &docs_path)?;

        replace_all(&[
            (staged_emb.path(), emb_path.as_path()),
            (staged_docs.path(), docs_path.as_path()),
        ])?;
        info!(
            dir = %self.dir.display(),
            vectors = embeddings.len(),
            model,
            "embedding cache written"
        );
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        for path in [self.embeddings_path(), self.documents_path()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
