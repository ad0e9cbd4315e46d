//! Batch driver from raw corpus to persisted, searchable artifacts.
//!
//! `load -> non-empty check -> chunk per category -> >=1 chunk check ->
//! embed in batches -> build index -> persist`. Any failure aborts the run;
//! artifacts are written to a staging directory inside the output
//! directory and only swapped into place once all of them exist, so a failed
//! run never disturbs the previous index.

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use ragidx_core::config::Settings;
use ragidx_core::{
    chunk_documents, Chunk, DocType, Document, DocumentLoader, Embedder, Error, Metric, Result,
};
use ragidx_vector::store::replace_all;
use ragidx_vector::{load_pair, pair_state, EmbeddingCache, PairState, VectorIndex};

use crate::metadata::{load_run_metadata, write_json_file, RunMetadata};

pub const INDEX_FILE: &str = "vector_index.safetensors";
pub const DOCUMENTS_FILE: &str = "documents.json";
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub chunk_size: usize,
    pub overlap: usize,
    pub max_workers: usize,
    pub batch_size: usize,
    pub metric: Metric,
    pub output_dir: PathBuf,
}

impl PipelineSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            chunk_size: settings.chunking.chunk_size,
            overlap: settings.chunking.overlap,
            max_workers: settings.chunking.max_workers,
            batch_size: settings.embedding.batch_size,
            metric: settings.index.metric,
            output_dir: settings.index.output_dir.clone(),
        }
    }
}

/// Chunks of one run grouped by document category, each group ordered by
/// `(source, path, chunk_index)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedData {
    pub guidelines: Vec<Chunk>,
    pub case_studies: Vec<Chunk>,
    pub other: Vec<Chunk>,
}

impl ProcessedData {
    pub fn total(&self) -> usize {
        self.guidelines.len() + self.case_studies.len() + self.other.len()
    }

    /// All chunks in persisted order: guidelines, case studies, then the rest.
    pub fn all(&self) -> Vec<Chunk> {
        self.guidelines
            .iter()
            .chain(&self.case_studies)
            .chain(&self.other)
            .cloned()
            .collect()
    }

    fn from_chunks(chunks: Vec<Chunk>) -> Self {
        let mut data = Self::default();
        for chunk in chunks {
            match chunk.metadata.doc_type {
                DocType::Guideline => data.guidelines.push(chunk),
                DocType::CaseStudy => data.case_studies.push(chunk),
                DocType::Other => data.other.push(chunk),
            }
        }
        data
    }
}

pub struct IndexPipeline<L: DocumentLoader> {
    loader: L,
    embedder: Arc<dyn Embedder>,
    settings: PipelineSettings,
    cache: Option<EmbeddingCache>,
}

impl<L: DocumentLoader> IndexPipeline<L> {
    pub fn new(loader: L, embedder: Arc<dyn Embedder>, settings: PipelineSettings) -> Self {
        Self {
            loader,
            embedder,
            settings,
            cache: None,
        }
    }

    /// Reuses embeddings from `cache` when a run produces exactly the chunk
    /// list that was embedded last time, and refreshes it otherwise.
    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn process_documents(&self) -> Result<ProcessedData> {
        info!(stage = "load", "loading documents");
        let docs = self.loader.load()?;
        if docs.is_empty() {
            return Err(Error::pipeline("load", "no documents found"));
        }
        info!(stage = "load", documents = docs.len(), "documents loaded");

        let data = self.chunk_by_category(docs);
        if data.total() == 0 {
            return Err(Error::pipeline("chunk", "documents produced no chunks"));
        }
        info!(
            stage = "chunk",
            guidelines = data.guidelines.len(),
            case_studies = data.case_studies.len(),
            other = data.other.len(),
            "chunking finished"
        );

        let chunks = data.all();
        let embeddings = self.embed(&chunks)?;

        info!(
            stage = "index",
            vectors = embeddings.len(),
            metric = %self.settings.metric,
            "building vector index"
        );
        let index =
            VectorIndex::from_rows(self.embedder.dimension(), self.settings.metric, &embeddings)?;

        let metadata = RunMetadata {
            total_guidelines: data.guidelines.len(),
            total_case_studies: data.case_studies.len(),
            total_other: data.other.len(),
            embedding_model: self.embedder.model_name().to_string(),
            dimension: self.embedder.dimension(),
            metric: self.settings.metric,
            chunk_size: self.settings.chunk_size,
            overlap: self.settings.overlap,
            built_at: Utc::now(),
        };
        self.persist(&index, &chunks, &metadata)?;
        Ok(data)
    }

    fn chunk_by_category(&self, docs: Vec<Document>) -> ProcessedData {
        let mut by_type: [(DocType, Vec<Document>); 3] = [
            (DocType::Guideline, Vec::new()),
            (DocType::CaseStudy, Vec::new()),
            (DocType::Other, Vec::new()),
        ];
        for doc in docs {
            if let Some((_, bucket)) = by_type.iter_mut().find(|(t, _)| *t == doc.doc_type) {
                bucket.push(doc);
            }
        }

        let mut chunks = Vec::new();
        for (doc_type, docs) in by_type {
            if docs.is_empty() {
                continue;
            }
            let count = docs.len();
            let mut produced = chunk_documents(
                docs,
                self.settings.chunk_size,
                self.settings.overlap,
                self.settings.max_workers,
            );
            produced.sort_by(|a, b| {
                (&a.metadata.source, &a.metadata.path, a.metadata.chunk_index).cmp(&(
                    &b.metadata.source,
                    &b.metadata.path,
                    b.metadata.chunk_index,
                ))
            });
            info!(
                stage = "chunk",
                %doc_type,
                documents = count,
                chunks = produced.len(),
                "category chunked"
            );
            chunks.extend(produced);
        }
        ProcessedData::from_chunks(chunks)
    }

    fn embed(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let model = self.embedder.model_name();
        let dimension = self.embedder.dimension();
        if let Some(cache) = &self.cache {
            if let Some(record) = cache.load() {
                if record.matches(chunks, model, dimension) {
                    info!(
                        stage = "embed",
                        chunks = chunks.len(),
                        dir = %cache.dir().display(),
                        "embedding cache hit"
                    );
                    return Ok(record.embeddings);
                }
                info!(stage = "embed", "embedding cache is stale");
            }
        }

        let embeddings = self.embed_all(chunks)?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(chunks, &embeddings, model) {
                warn!(stage = "embed", error = %e, "could not update embedding cache");
            }
        }
        Ok(embeddings)
    }

    fn embed_all(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let batch_size = self.settings.batch_size.max(1);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        info!(
            stage = "embed",
            chunks = texts.len(),
            batch_size,
            model = self.embedder.model_name(),
            "embedding"
        );

        let pb = ProgressBar::new(texts.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] \
                     {pos}/{len} chunks ({percent}%) {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            match self.embedder.encode(batch, batch_size) {
                Ok(rows) => embeddings.extend(rows),
                Err(e) => {
                    pb.abandon_with_message("embedding failed");
                    return Err(e);
                }
            }
            pb.inc(batch.len() as u64);
        }
        pb.finish_with_message("embedded");
        Ok(embeddings)
    }

    fn persist(&self, index: &VectorIndex, chunks: &[Chunk], metadata: &RunMetadata) -> Result<()> {
        let out = &self.settings.output_dir;
        fs::create_dir_all(out)?;

        if let Some(previous) = load_run_metadata(&out.join(METADATA_FILE)) {
            for change in metadata.drift_from(&previous) {
                warn!(stage = "persist", %change, "configuration drift since previous run");
            }
        }

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(out)?;
        index.save(&staging.path().join(INDEX_FILE))?;
        write_json_file(chunks, &staging.path().join(DOCUMENTS_FILE))?;
        write_json_file(metadata, &staging.path().join(METADATA_FILE))?;

        // metadata goes last so its presence marks a complete run
        let moves: Vec<(PathBuf, PathBuf)> = [INDEX_FILE, DOCUMENTS_FILE, METADATA_FILE]
            .into_iter()
            .map(|name| (staging.path().join(name), out.join(name)))
            .collect();
        let moves: Vec<(&Path, &Path)> = moves
            .iter()
            .map(|(from, to)| (from.as_path(), to.as_path()))
            .collect();
        replace_all(&moves)?;
        info!(
            stage = "persist",
            dir = %out.display(),
            vectors = chunks.len(),
            "artifacts written"
        );
        Ok(())
    }
}

/// Index and chunks from a previous run, if a complete, consistent pair
/// exists in `output_dir`. A half-present pair is a configuration error.
pub fn load_search_index(output_dir: &Path) -> Result<Option<(VectorIndex, Vec<Chunk>)>> {
    let index_path = output_dir.join(INDEX_FILE);
    let docs_path = output_dir.join(DOCUMENTS_FILE);
    if pair_state(&index_path, &docs_path) == PairState::Missing {
        return Ok(None);
    }
    match load_pair(&index_path, &docs_path) {
        Ok(pair) => Ok(Some(pair)),
        Err(Error::IndexMismatch { vectors, chunks }) => {
            warn!(
                dir = %output_dir.display(),
                vectors,
                chunks,
                "persisted index and documents disagree; rebuild required"
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Chunks from a previous run, grouped by category.
pub fn load_processed_data(output_dir: &Path) -> Result<Option<ProcessedData>> {
    let loaded = load_search_index(output_dir)?;
    Ok(loaded.map(|(_, chunks)| ProcessedData::from_chunks(chunks)))
}
