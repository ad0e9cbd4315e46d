//! Embedding backends behind the `ragidx_core::Embedder` trait.
//!
//! - [`BgeEmbedder`]: local BGE-M3 model on candle.
//! - [`HashEmbedder`]: deterministic token hashing, no model files.
//! - [`RemoteEmbedder`]: OpenAI-compatible HTTP endpoint.

pub mod bge;
pub mod device;
pub mod hash;
pub mod pool;
pub mod remote;
pub mod tokenize;

use std::sync::Arc;
use tracing::info;

use ragidx_core::config::{EmbeddingBackend, EmbeddingConfig};
use ragidx_core::{Embedder, Error, Result};

pub use bge::BgeEmbedder;
pub use hash::HashEmbedder;
pub use pool::masked_mean_l2;
pub use remote::RemoteEmbedder;

/// Builds the backend named by `config.backend`.
///
/// `APP_USE_FAKE_EMBEDDINGS=1` forces the hash embedder so development runs
/// never need model weights.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    let backend = if use_fake {
        EmbeddingBackend::Hash
    } else {
        config.backend
    };

    let embedder: Arc<dyn Embedder> = match backend {
        EmbeddingBackend::Hash => Arc::new(HashEmbedder::new(config.dimension)),
        EmbeddingBackend::Bge => {
            let bge = BgeEmbedder::new(config).map_err(|e| Error::Embedding(format!("{e:#}")))?;
            Arc::new(bge)
        }
        EmbeddingBackend::Remote => {
            let remote = RemoteEmbedder::new(config).map_err(|e| Error::config(format!("{e:#}")))?;
            Arc::new(remote)
        }
    };
    info!(
        model = embedder.model_name(),
        dim = embedder.dimension(),
        "embedder ready"
    );
    Ok(embedder)
}
