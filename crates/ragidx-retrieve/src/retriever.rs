//! Builds the live index from chunks and answers similarity queries.
//!
//! Rebuilds are serialised by a writer lock and prepared off to the side;
//! queries clone an `Arc` of the last complete snapshot, so a rebuild in
//! progress never blocks or disturbs them. The new snapshot is swapped in
//! only after the whole build succeeded.

use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use ragidx_core::{
    relevance_from_distance, Chunk, Embedder, Error, Metric, QueryResult, Result,
};
use ragidx_vector::{load_pair, save_pair, EmbeddingCache, VectorIndex};

#[derive(Debug)]
pub(crate) struct IndexSnapshot {
    pub(crate) index: VectorIndex,
    pub(crate) chunks: Vec<Chunk>,
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    cache: Option<EmbeddingCache>,
    metric: Metric,
    snapshot: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<()>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, metric: Metric) -> Self {
        let empty = IndexSnapshot {
            index: VectorIndex::new(embedder.dimension(), metric),
            chunks: Vec::new(),
        };
        Self {
            embedder,
            cache: None,
            metric,
            snapshot: RwLock::new(Arc::new(empty)),
            writer: Mutex::new(()),
        }
    }

    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn total_vectors(&self) -> usize {
        self.current().index.total_vectors()
    }

    /// Chunks of the live index, position-aligned with its vectors.
    pub fn chunks(&self) -> Vec<Chunk> {
        self.current().chunks.clone()
    }

    fn current(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    fn install(&self, index: VectorIndex, chunks: Vec<Chunk>) {
        *self.snapshot.write() = Arc::new(IndexSnapshot { index, chunks });
    }

    /// Embeds `chunks` (or reuses a matching cache record) and swaps in a
    /// freshly built index. Returns `Ok(false)` for an empty chunk list,
    /// leaving the live index as it was.
    ///
    /// An embedding failure aborts the build; the previous index stays live.
    pub fn index_documents(
        &self,
        chunks: &[Chunk],
        batch_size: usize,
        force_reindex: bool,
    ) -> Result<bool> {
        if chunks.is_empty() {
            warn!("index_documents called with no chunks; keeping current index");
            return Ok(false);
        }
        let _guard = self.writer.lock();
        let dim = self.embedder.dimension();
        let model = self.embedder.model_name();

        let cached = match (&self.cache, force_reindex) {
            (Some(cache), false) => cache
                .load()
                .filter(|record| record.matches(chunks, model, dim)),
            _ => None,
        };

        let embeddings = match cached {
            Some(record) => {
                info!(chunks = chunks.len(), model, "embedding cache hit");
                record.embeddings
            }
            None => {
                info!(
                    chunks = chunks.len(),
                    batch_size,
                    force_reindex,
                    model,
                    "embedding chunks"
                );
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                let embeddings = self.embedder.encode(&texts, batch_size)?;
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.save(chunks, &embeddings, model) {
                        warn!(error = %e, "could not write embedding cache");
                    }
                }
                embeddings
            }
        };

        let index = VectorIndex::from_rows(dim, self.metric, &embeddings)?;
        self.install(index, chunks.to_vec());
        info!(vectors = chunks.len(), metric = %self.metric, "index built");
        Ok(true)
    }

    /// Top-`top_k` chunks for `query`, scored `1 / (1 + distance)`.
    ///
    /// An empty index or `top_k == 0` yields no results rather than an error.
    pub fn hybrid_search(&self, query: &str, top_k: usize) -> Result<Vec<QueryResult>> {
        let snapshot = self.current();
        if snapshot.index.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.encode_one(query)?;
        let hits = snapshot.index.search(&query_vec, top_k)?;
        Ok(collect_results(&snapshot, hits.iter()))
    }

    pub fn save_index(&self, index_path: &Path, docs_path: &Path) -> Result<()> {
        let snapshot = self.current();
        save_pair(&snapshot.index, &snapshot.chunks, index_path, docs_path)
    }

    /// Loads a persisted pair and makes it live. The stored dimension must
    /// match this retriever's embedder.
    pub fn load_index(&self, index_path: &Path, docs_path: &Path) -> Result<()> {
        let (index, chunks) = load_pair(index_path, docs_path)?;
        self.replace_index(index, chunks)
    }

    /// Installs an already built index, e.g. one read by the pipeline.
    pub fn replace_index(&self, index: VectorIndex, chunks: Vec<Chunk>) -> Result<()> {
        if index.dimension() != self.embedder.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.embedder.dimension(),
                actual: index.dimension(),
            });
        }
        if index.total_vectors() != chunks.len() {
            return Err(Error::IndexMismatch {
                vectors: index.total_vectors(),
                chunks: chunks.len(),
            });
        }
        let _guard = self.writer.lock();
        if index.metric() != self.metric {
            debug!(
                stored = %index.metric(),
                configured = %self.metric,
                "loaded index keeps its stored metric"
            );
        }
        info!(vectors = chunks.len(), "index loaded");
        self.install(index, chunks);
        Ok(())
    }
}

fn collect_results(
    snapshot: &IndexSnapshot,
    hits: impl Iterator<Item = (usize, f32)>,
) -> Vec<QueryResult> {
    let mut dropped = 0usize;
    let results: Vec<QueryResult> = hits
        .filter_map(|(i, distance)| match snapshot.chunks.get(i) {
            Some(chunk) => Some(QueryResult {
                chunk: chunk.clone(),
                score: relevance_from_distance(distance),
            }),
            None => {
                dropped += 1;
                None
            }
        })
        .collect();
    if dropped > 0 {
        debug!(dropped, "ignored hits outside the chunk array");
    }
    results
}
