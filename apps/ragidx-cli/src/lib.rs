//! Shared plumbing for the `ragidx-index` and `ragidx-search` binaries.

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ragidx_core::config::{Config, Settings};
use ragidx_core::{DocumentLoader, Embedder};
use ragidx_pipeline::{
    load_run_metadata, load_search_index, IndexPipeline, PipelineSettings, METADATA_FILE,
};
use ragidx_vector::EmbeddingCache;

/// Installs the fmt subscriber on stderr; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads layered configuration from `dir` and anchors relative paths there.
pub fn load_settings(dir: &Path) -> anyhow::Result<Settings> {
    let config = Config::load_from(dir).context("loading configuration")?;
    let settings = config.settings().context("invalid configuration")?;
    let base = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    Ok(settings.resolve_paths(&base))
}

/// Whether `output_dir` already holds a complete index built with the
/// given embedder. Partial or mismatched artifacts count as stale.
pub fn index_is_current(output_dir: &Path, model: &str, dimension: usize) -> bool {
    let Some(meta) = load_run_metadata(&output_dir.join(METADATA_FILE)) else {
        return false;
    };
    if meta.embedding_model != model || meta.dimension != dimension {
        info!(
            stored = %meta.embedding_model,
            configured = model,
            "embedder changed since last build"
        );
        return false;
    }
    match load_search_index(output_dir) {
        Ok(Some((_, chunks))) => chunks.len() == meta.total_chunks(),
        Ok(None) => false,
        Err(e) => {
            warn!(dir = %output_dir.display(), error = %e, "existing artifacts are unusable");
            false
        }
    }
}

/// Pipeline for `settings`, reusing embeddings from `embedding.cache_dir`
/// unless `use_cache` is off.
pub fn index_pipeline<L: DocumentLoader>(
    loader: L,
    embedder: Arc<dyn Embedder>,
    settings: &Settings,
    use_cache: bool,
) -> IndexPipeline<L> {
    let pipeline = IndexPipeline::new(loader, embedder, PipelineSettings::from_settings(settings));
    if use_cache {
        pipeline.with_cache(EmbeddingCache::new(&settings.embedding.cache_dir))
    } else {
        pipeline
    }
}

/// Coarse candidates to re-rank: the command-line value if given, else
/// `retrieval.rerank_candidates`. `None` means plain hybrid search.
pub fn rerank_depth(requested: Option<usize>, settings: &Settings) -> Option<usize> {
    match requested.unwrap_or(settings.retrieval.rerank_candidates) {
        0 => None,
        n => Some(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragidx_core::loader::StaticLoader;
    use ragidx_core::{DocType, Document, Metric};
    use ragidx_embed::HashEmbedder;
    use ragidx_pipeline::DOCUMENTS_FILE;

    fn build(out: &Path) {
        let docs = vec![Document::new(
            "a.txt",
            DocType::Guideline,
            "Consent is required. Data must be minimized.",
        )];
        let settings = PipelineSettings {
            chunk_size: 6,
            overlap: 1,
            max_workers: 1,
            batch_size: 4,
            metric: Metric::InnerProduct,
            output_dir: out.to_path_buf(),
        };
        IndexPipeline::new(
            StaticLoader::new(docs),
            Arc::new(HashEmbedder::new(32)),
            settings,
        )
        .process_documents()
        .unwrap();
    }

    #[test]
    fn fresh_build_is_current_for_its_embedder_only() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!index_is_current(tmp.path(), "hash-xxh64-d32", 32));
        build(tmp.path());
        assert!(index_is_current(tmp.path(), "hash-xxh64-d32", 32));
        assert!(!index_is_current(tmp.path(), "BAAI/bge-m3", 1024));
    }

    #[test]
    fn half_written_index_is_stale() {
        let tmp = tempfile::tempdir().unwrap();
        build(tmp.path());
        std::fs::remove_file(tmp.path().join(DOCUMENTS_FILE)).unwrap();
        assert!(!index_is_current(tmp.path(), "hash-xxh64-d32", 32));
    }

    #[test]
    fn settings_paths_are_anchored_at_the_config_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let toml = "[index]\noutput_dir = \"out\"\n";
        std::fs::write(tmp.path().join("config.toml"), toml).unwrap();
        let settings = load_settings(tmp.path()).unwrap();
        assert!(settings.index.output_dir.is_absolute());
        assert!(settings.index.output_dir.ends_with("out"));
    }

    #[test]
    fn rerank_defaults_to_configured_candidates() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = load_settings(tmp.path()).unwrap();
        assert_eq!(rerank_depth(None, &settings), Some(20));
        assert_eq!(rerank_depth(Some(8), &settings), Some(8));
        assert_eq!(rerank_depth(Some(0), &settings), None);
    }

    #[test]
    fn index_runs_fill_the_configured_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let toml = "[index]\noutput_dir = \"out\"\n[embedding]\ncache_dir = \"emb-cache\"\n";
        std::fs::write(tmp.path().join("config.toml"), toml).unwrap();
        let settings = load_settings(tmp.path()).unwrap();
        let docs = vec![Document::new("a.txt", DocType::Guideline, "Consent is required.")];
        let embedder = Arc::new(HashEmbedder::new(32));

        let uncached = StaticLoader::new(docs.clone());
        index_pipeline(uncached, embedder.clone(), &settings, false)
            .process_documents()
            .unwrap();
        assert!(!settings.embedding.cache_dir.exists());

        index_pipeline(StaticLoader::new(docs), embedder, &settings, true)
            .process_documents()
            .unwrap();
        assert!(settings.embedding.cache_dir.ends_with("emb-cache"));
        assert!(settings.embedding.cache_dir.join("embeddings.safetensors").exists());
    }
}
