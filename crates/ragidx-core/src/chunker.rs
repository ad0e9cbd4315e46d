//! Sentence-aligned chunking with sentence-count overlap.
//!
//! Text is split on `.`, `!` or `?` followed by whitespace, then sentences
//! are packed greedily until the next one would push the chunk past
//! `chunk_size` words. Each new chunk starts with the trailing `overlap`
//! sentences of the previous one. A sentence longer than `chunk_size` is
//! never split, so the bound is soft.

use regex::Regex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{Chunk, ChunkMetadata, Document};

static SENTENCE_BOUNDARY: OnceLock<Option<Regex>> = OnceLock::new();

fn sentence_boundary() -> Result<&'static Regex> {
    SENTENCE_BOUNDARY
        .get_or_init(|| Regex::new(r"[.!?]+\s+").ok())
        .as_ref()
        .ok_or_else(|| Error::config("sentence boundary pattern failed to compile"))
}

fn try_split_sentences(text: &str) -> Result<Vec<String>> {
    let boundary = sentence_boundary()?;
    let mut sentences = Vec::new();
    let mut start = 0usize;
    for m in boundary.find_iter(text) {
        // keep the punctuation, drop the whitespace
        let end = m.start() + m.as_str().trim_end().len();
        push_sentence(&mut sentences, &text[start..end]);
        start = m.end();
    }
    push_sentence(&mut sentences, &text[start..]);
    Ok(sentences)
}

fn push_sentence(out: &mut Vec<String>, raw: &str) {
    let s = raw.trim();
    if !s.is_empty() {
        out.push(s.to_string());
    }
}

/// Splits `text` into trimmed, non-empty sentences.
pub fn split_sentences(text: &str) -> Vec<String> {
    try_split_sentences(text).unwrap_or_else(|e| {
        warn!(error = %e, "sentence splitting unavailable; treating text as one sentence");
        let mut out = Vec::new();
        push_sentence(&mut out, text);
        out
    })
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }

    /// Chunks `text`, stamping each chunk with `base` plus its position.
    ///
    /// Never fails: if chunking errors the whole text comes back as a single
    /// chunk so one bad document cannot sink a corpus run.
    pub fn chunk(&self, text: &str, base: &ChunkMetadata) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        match self.try_chunk(text, base) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(
                    source = %base.source,
                    error = %e,
                    "chunking failed; falling back to a single chunk"
                );
                vec![Chunk {
                    text: text.to_string(),
                    metadata: ChunkMetadata {
                        chunk_index: 0,
                        total_chunks: 1,
                        ..base.clone()
                    },
                }]
            }
        }
    }

    pub fn try_chunk(&self, text: &str, base: &ChunkMetadata) -> Result<Vec<Chunk>> {
        if self.chunk_size == 0 {
            return Err(Error::config("chunk_size must be greater than zero"));
        }
        let sentences = try_split_sentences(text)?;
        let groups = self.pack(&sentences);
        let total = groups.len();
        Ok(groups
            .into_iter()
            .enumerate()
            .map(|(i, group)| Chunk {
                text: group.join(" "),
                metadata: ChunkMetadata {
                    chunk_index: i,
                    total_chunks: total,
                    ..base.clone()
                },
            })
            .collect())
    }

    pub fn chunk_document(&self, doc: &Document) -> Vec<Chunk> {
        self.chunk(&doc.text, &ChunkMetadata::for_document(doc))
    }

    fn pack<'a>(&self, sentences: &'a [String]) -> Vec<Vec<&'a str>> {
        let mut groups = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_words = 0usize;
        for sentence in sentences {
            let words = word_count(sentence);
            if !current.is_empty() && current_words + words > self.chunk_size {
                let keep = self.overlap.min(current.len());
                let seed = current[current.len() - keep..].to_vec();
                groups.push(std::mem::replace(&mut current, seed));
                current_words = current.iter().map(|s| word_count(s)).sum();
            }
            current.push(sentence.as_str());
            current_words += words;
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }
}

/// Chunks many documents on a bounded pool of `max_workers` blocking threads.
///
/// Results arrive in completion order: chunks of one document stay in order
/// but documents interleave arbitrarily, so consumers must rely on
/// `(source, chunk_index)` rather than position. A document whose chunking
/// panics is logged and skipped. Safe to call from async code: inside a
/// tokio runtime the pool is driven from a separate scoped thread.
pub fn chunk_documents(
    docs: Vec<Document>,
    chunk_size: usize,
    overlap: usize,
    max_workers: usize,
) -> Vec<Chunk> {
    let chunker = Chunker::new(chunk_size, overlap);
    scatter_gather(docs, max_workers, move |doc| chunker.chunk_document(doc))
}

fn scatter_gather<F>(docs: Vec<Document>, max_workers: usize, work: F) -> Vec<Chunk>
where
    F: Fn(&Document) -> Vec<Chunk> + Send + Sync + 'static,
{
    if tokio::runtime::Handle::try_current().is_err() {
        return run_pool(docs, max_workers, work);
    }
    // block_on panics on a runtime thread
    std::thread::scope(|scope| {
        scope
            .spawn(move || run_pool(docs, max_workers, work))
            .join()
    })
    .unwrap_or_else(|_| {
        warn!("chunking pool thread panicked; no chunks produced");
        Vec::new()
    })
}

fn run_pool<F>(docs: Vec<Document>, max_workers: usize, work: F) -> Vec<Chunk>
where
    F: Fn(&Document) -> Vec<Chunk> + Send + Sync + 'static,
{
    let workers = max_workers.max(1);
    let work = Arc::new(work);
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(workers)
        .thread_name("ragidx-chunk")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            warn!(error = %e, "could not start chunking pool; chunking sequentially");
            return docs.iter().flat_map(|d| run_guarded(work.as_ref(), d)).collect();
        }
    };

    runtime.block_on(async move {
        let mut set = JoinSet::new();
        for doc in docs {
            let work = Arc::clone(&work);
            set.spawn_blocking(move || run_guarded(work.as_ref(), &doc));
        }
        let mut out = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(chunks) => out.extend(chunks),
                Err(e) => warn!(error = %e, "chunking task aborted; document skipped"),
            }
        }
        debug!(chunks = out.len(), workers, "parallel chunking finished");
        out
    })
}

fn run_guarded<F>(work: &F, doc: &Document) -> Vec<Chunk>
where
    F: Fn(&Document) -> Vec<Chunk>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| work(doc))) {
        Ok(chunks) => chunks,
        Err(_) => {
            warn!(source = %doc.source, "chunking panicked; document skipped");
            Vec::new()
        }
    }
}
