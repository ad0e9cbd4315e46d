use std::sync::Arc;
use tracing::{debug, warn};

use ragidx_core::{relevance_from_distance, Embedder, Error, QueryResult, Result};

/// Second-pass scorer over a bounded candidate list.
///
/// Candidates and query are embedded together with the re-ranking embedder
/// and rescored by cosine distance through the same relevance conversion the
/// retriever uses, so scores stay comparable across both stages.
pub struct Reranker {
    embedder: Arc<dyn Embedder>,
}

impl Reranker {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Returns at most `top_k` results, best first. Lists no longer than
    /// `top_k` come back untouched; any embedding failure falls back to the
    /// incoming order truncated to `top_k`.
    pub fn rerank(
        &self,
        query: &str,
        mut results: Vec<QueryResult>,
        top_k: usize,
    ) -> Vec<QueryResult> {
        if results.len() <= top_k {
            return results;
        }
        match self.rescore(query, &results) {
            Ok(scores) => {
                for (result, score) in results.iter_mut().zip(scores) {
                    result.score = score;
                }
                results.sort_by(|a, b| b.score.total_cmp(&a.score));
                debug!(candidates = results.len(), top_k, "re-ranked");
            }
            Err(e) => warn!(error = %e, "re-ranking failed; keeping coarse order"),
        }
        results.truncate(top_k);
        results
    }

    fn rescore(&self, query: &str, results: &[QueryResult]) -> Result<Vec<f32>> {
        let mut texts = Vec::with_capacity(results.len() + 1);
        texts.push(query.to_string());
        texts.extend(results.iter().map(|r| r.chunk.text.clone()));

        let rows = self.embedder.encode(&texts, texts.len())?;
        let (query_vec, candidates) = rows
            .split_first()
            .ok_or_else(|| Error::embedding("re-ranking embedder returned nothing"))?;
        Ok(candidates
            .iter()
            .map(|c| relevance_from_distance(1.0 - cosine_similarity(query_vec, c)))
            .collect())
    }
}

/// Cosine similarity; zero-norm inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
