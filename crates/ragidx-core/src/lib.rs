//! Shared building blocks for the ragidx workspace: domain types, the error
//! taxonomy, layered configuration, the embedder and loader seams, and the
//! sentence chunker.

pub mod chunker;
pub mod config;
pub mod error;
pub mod loader;
pub mod traits;
pub mod types;

pub use chunker::{chunk_documents, split_sentences, Chunker};
pub use error::{Error, Result};
pub use traits::{DocumentLoader, Embedder};
pub use types::{
    relevance_from_distance, Chunk, ChunkMetadata, DocType, Document, Metric, QueryResult,
};
