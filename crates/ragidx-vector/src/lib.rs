//! Flat vector index on candle tensors, index/documents pair persistence,
//! and the embedding cache consulted before re-embedding a corpus.

pub mod cache;
pub mod index;
pub mod store;

pub use cache::{content_hash, CacheRecord, EmbeddingCache};
pub use index::{SearchHits, VectorIndex};
pub use store::{load_pair, pair_state, save_pair, PairState};
