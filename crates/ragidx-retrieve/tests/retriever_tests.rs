use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use ragidx_core::{
    Chunk, ChunkMetadata, Chunker, DocType, Document, Embedder, Error, Metric, QueryResult, Result,
};
use ragidx_embed::HashEmbedder;
use ragidx_retrieve::{Reranker, Retriever};
use ragidx_vector::EmbeddingCache;

/// Hash embeddings plus a tally of every text sent for embedding.
struct CountingEmbedder {
    inner: HashEmbedder,
    texts: AtomicUsize,
}

impl CountingEmbedder {
    fn new(dim: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: HashEmbedder::new(dim),
            texts: AtomicUsize::new(0),
        })
    }

    fn embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

impl Embedder for CountingEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed_batch(texts)
    }
}

/// Fails any batch that contains the word POISON.
struct PoisonEmbedder(HashEmbedder);

impl Embedder for PoisonEmbedder {
    fn dimension(&self) -> usize {
        self.0.dimension()
    }

    fn model_name(&self) -> &str {
        "poison"
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains("POISON")) {
            return Err(Error::Embedding("service unavailable".into()));
        }
        self.0.embed_batch(texts)
    }
}

fn chunk(source: &str, i: usize, text: &str) -> Chunk {
    Chunk {
        text: text.to_string(),
        metadata: ChunkMetadata {
            source: source.into(),
            path: source.into(),
            chunk_index: i,
            ..Default::default()
        },
    }
}

fn corpus() -> Vec<Chunk> {
    vec![
        chunk("a.txt", 0, "Privacy matters. Consent is required."),
        chunk("a.txt", 1, "Consent is required. Data must be minimized."),
        chunk("b.txt", 0, "Bias harms users. Fairness is essential."),
    ]
}

fn result(source: &str, text: &str, score: f32) -> QueryResult {
    QueryResult {
        chunk: chunk(source, 0, text),
        score,
    }
}

#[test]
fn fresh_retriever_returns_no_results() {
    let embedder = CountingEmbedder::new(64);
    let retriever = Retriever::new(embedder.clone(), Metric::InnerProduct);
    assert!(retriever.hybrid_search("anything", 5).unwrap().is_empty());
    assert_eq!(retriever.total_vectors(), 0);
    assert_eq!(embedder.embedded(), 0, "no query embedding against an empty index");
}

#[test]
fn empty_chunk_list_is_not_indexed() {
    let retriever = Retriever::new(Arc::new(HashEmbedder::new(16)), Metric::L2);
    assert!(!retriever.index_documents(&[], 8, false).unwrap());
}

#[test]
fn end_to_end_consent_query_hits_privacy_document() {
    let docs = vec![
        Document::new(
            "privacy.txt",
            DocType::Guideline,
            "Privacy matters. Consent is required. Data must be minimized.",
        ),
        Document::new(
            "bias.txt",
            DocType::CaseStudy,
            "Bias harms users. Fairness is essential.",
        ),
    ];
    let chunker = Chunker::new(6, 1);
    let privacy = chunker.chunk_document(&docs[0]);
    let bias = chunker.chunk_document(&docs[1]);
    assert!(privacy.len() >= 2);
    assert_eq!(bias.len(), 1);

    let chunks: Vec<Chunk> = privacy.into_iter().chain(bias).collect();
    let retriever = Retriever::new(Arc::new(HashEmbedder::new(1024)), Metric::InnerProduct);
    assert!(retriever.index_documents(&chunks, 2, false).unwrap());

    let results = retriever.hybrid_search("How should consent be handled?", 1).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.metadata.source, "privacy.txt");
    assert!(results[0].score > 0.0 && results[0].score <= 1.0);
}

#[test]
fn query_identical_to_a_chunk_scores_one() {
    let retriever = Retriever::new(Arc::new(HashEmbedder::new(128)), Metric::L2);
    retriever.index_documents(&corpus(), 2, false).unwrap();
    let results = retriever
        .hybrid_search("Bias harms users. Fairness is essential.", 3)
        .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].chunk.metadata.source, "b.txt");
    assert_eq!(results[0].score, 1.0);
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn second_identical_run_is_served_from_cache() {
    let tmp = TempDir::new().unwrap();
    let embedder = CountingEmbedder::new(64);
    let retriever = Retriever::new(embedder.clone(), Metric::InnerProduct)
        .with_cache(EmbeddingCache::new(tmp.path().join("cache")));
    let chunks = corpus();

    assert!(retriever.index_documents(&chunks, 2, false).unwrap());
    assert_eq!(embedder.embedded(), 3);
    let before = retriever.hybrid_search("consent", 2).unwrap();

    assert!(retriever.index_documents(&chunks, 2, false).unwrap());
    assert_eq!(
        embedder.embedded(),
        3 + 1,
        "only the query was embedded in between"
    );
    assert_eq!(retriever.hybrid_search("consent", 2).unwrap(), before);

    // a fresh retriever over the same cache directory also hits
    let other = CountingEmbedder::new(64);
    let reopened = Retriever::new(other.clone(), Metric::InnerProduct)
        .with_cache(EmbeddingCache::new(tmp.path().join("cache")));
    assert!(reopened.index_documents(&chunks, 2, false).unwrap());
    assert_eq!(other.embedded(), 0);
}

#[test]
fn any_changed_chunk_or_forced_run_re_embeds() {
    let tmp = TempDir::new().unwrap();
    let embedder = CountingEmbedder::new(64);
    let retriever = Retriever::new(embedder.clone(), Metric::InnerProduct)
        .with_cache(EmbeddingCache::new(tmp.path().join("cache")));
    let mut chunks = corpus();
    retriever.index_documents(&chunks, 8, false).unwrap();
    assert_eq!(embedder.embedded(), 3);

    chunks[1].text = "Consent is required. Data must be deleted.".into();
    retriever.index_documents(&chunks, 8, false).unwrap();
    assert_eq!(embedder.embedded(), 6);

    retriever.index_documents(&chunks, 8, true).unwrap();
    assert_eq!(embedder.embedded(), 9);

    chunks.swap(0, 2);
    retriever.index_documents(&chunks, 8, false).unwrap();
    assert_eq!(embedder.embedded(), 12, "reordering is a miss");
}

#[test]
fn cache_from_another_model_is_ignored() {
    let tmp = TempDir::new().unwrap();
    let cache_dir = tmp.path().join("cache");
    let chunks = corpus();
    Retriever::new(Arc::new(HashEmbedder::new(64)), Metric::L2)
        .with_cache(EmbeddingCache::new(&cache_dir))
        .index_documents(&chunks, 4, false)
        .unwrap();

    let wider = CountingEmbedder::new(96);
    let retriever =
        Retriever::new(wider.clone(), Metric::L2).with_cache(EmbeddingCache::new(&cache_dir));
    retriever.index_documents(&chunks, 4, false).unwrap();
    assert_eq!(wider.embedded(), 3);
}

#[test]
fn embedding_failure_keeps_previous_index_live() {
    let retriever = Retriever::new(
        Arc::new(PoisonEmbedder(HashEmbedder::new(64))),
        Metric::InnerProduct,
    );
    retriever.index_documents(&corpus(), 2, false).unwrap();

    let mut bad = corpus();
    bad.push(chunk("c.txt", 0, "POISON pill."));
    let err = retriever.index_documents(&bad, 2, false).unwrap_err();
    assert!(matches!(err, Error::Embedding(_)));

    assert_eq!(retriever.total_vectors(), 3);
    assert_eq!(retriever.chunks(), corpus());
    assert!(!retriever.hybrid_search("consent", 1).unwrap().is_empty());
}

#[test]
fn save_and_load_index_round_trip() {
    let tmp = TempDir::new().unwrap();
    let index_path = tmp.path().join("vector_index.safetensors");
    let docs_path = tmp.path().join("documents.json");

    let retriever = Retriever::new(Arc::new(HashEmbedder::new(64)), Metric::InnerProduct);
    retriever.index_documents(&corpus(), 2, false).unwrap();
    retriever.save_index(&index_path, &docs_path).unwrap();
    let expected = retriever.hybrid_search("fairness", 2).unwrap();

    let embedder = CountingEmbedder::new(64);
    let loaded = Retriever::new(embedder.clone(), Metric::InnerProduct);
    loaded.load_index(&index_path, &docs_path).unwrap();
    assert_eq!(loaded.total_vectors(), 3);
    assert_eq!(loaded.hybrid_search("fairness", 2).unwrap(), expected);
    assert_eq!(embedder.embedded(), 1);

    let narrow = Retriever::new(Arc::new(HashEmbedder::new(32)), Metric::InnerProduct);
    let err = narrow.load_index(&index_path, &docs_path).unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 32,
            actual: 64
        }
    ));
    assert_eq!(narrow.total_vectors(), 0);

    std::fs::remove_file(&index_path).unwrap();
    assert!(loaded.load_index(&index_path, &docs_path).unwrap_err().is_config());
    assert_eq!(loaded.total_vectors(), 3, "failed load keeps the live index");
}

#[test]
fn queries_see_a_complete_index_while_rebuilding() {
    let retriever = Arc::new(Retriever::new(
        Arc::new(HashEmbedder::new(64)),
        Metric::InnerProduct,
    ));
    retriever.index_documents(&corpus(), 2, false).unwrap();
    let bigger: Vec<Chunk> = (0..200)
        .map(|i| chunk("big.txt", i, &format!("Sentence number {i} about consent.")))
        .collect();

    let writer = {
        let retriever = Arc::clone(&retriever);
        let bigger = bigger.clone();
        std::thread::spawn(move || retriever.index_documents(&bigger, 1, false).unwrap())
    };
    for _ in 0..50 {
        let n = retriever.chunks().len();
        assert!(n == 3 || n == 200, "observed a partial index of {n} chunks");
        let hits = retriever.hybrid_search("consent", 5).unwrap();
        assert!(!hits.is_empty());
    }
    assert!(writer.join().unwrap());
    assert_eq!(retriever.total_vectors(), 200);
}

#[test]
fn rerank_leaves_short_lists_untouched() {
    let reranker = Reranker::new(Arc::new(PoisonEmbedder(HashEmbedder::new(64))));
    let results = vec![result("a", "POISON one", 0.3), result("b", "two", 0.9)];
    assert_eq!(reranker.rerank("query", results.clone(), 2), results);
    assert_eq!(reranker.rerank("query", results.clone(), 5), results);
}

#[test]
fn rerank_reorders_by_cosine_relevance() {
    let reranker = Reranker::new(Arc::new(HashEmbedder::new(256)));
    let results = vec![
        result("w", "weather report for today", 0.9),
        result("x", "consent handling rules apply here", 0.8),
        result("y", "consent rules", 0.7),
        result("z", "bias harms users", 0.6),
    ];
    let reranked = reranker.rerank("consent handling rules", results, 2);
    let sources: Vec<&str> = reranked
        .iter()
        .map(|r| r.chunk.metadata.source.as_str())
        .collect();
    assert_eq!(sources, vec!["y", "x"]);
    assert!(reranked[0].score > reranked[1].score);
    assert!(reranked.iter().all(|r| r.score > 0.0 && r.score <= 1.0));
}

#[test]
fn rerank_ties_keep_incoming_order() {
    let reranker = Reranker::new(Arc::new(HashEmbedder::new(64)));
    let results = vec![
        result("first", "beta", 0.2),
        result("other", "gamma delta", 0.9),
        result("second", "beta", 0.8),
    ];
    let reranked = reranker.rerank("beta", results, 2);
    let sources: Vec<&str> = reranked
        .iter()
        .map(|r| r.chunk.metadata.source.as_str())
        .collect();
    assert_eq!(sources, vec!["first", "second"]);
}

#[test]
fn rerank_failure_falls_back_to_coarse_order() {
    let reranker = Reranker::new(Arc::new(PoisonEmbedder(HashEmbedder::new(64))));
    let results = vec![
        result("a", "one", 0.9),
        result("b", "two", 0.8),
        result("c", "three", 0.7),
    ];
    let out = reranker.rerank("POISON query", results.clone(), 2);
    assert_eq!(out, results[..2].to_vec());
}
