//! Two-stage retrieval: coarse vector search over the live index, then an
//! optional embedding-based re-rank of the candidates.

pub mod rerank;
pub mod retriever;

pub use rerank::{cosine_similarity, Reranker};
pub use retriever::Retriever;
