//! Domain types flowing through chunking, indexing and search.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type Meta = BTreeMap<String, String>;

/// Corpus category a document belongs to.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Guideline,
    CaseStudy,
    #[default]
    Other,
}

impl DocType {
    /// Maps a corpus folder name (`guidelines/`, `case_studies/`) to a category.
    pub fn from_dir_name(name: &str) -> Self {
        match name.to_ascii_lowercase().replace('-', "_").as_str() {
            "guideline" | "guidelines" => Self::Guideline,
            "case_study" | "case_studies" => Self::CaseStudy,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guideline => "guideline",
            Self::CaseStudy => "case_study",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distance used by the vector index; fixed for the lifetime of an index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// `1 - <q, v>`, a cosine distance when vectors are L2-normalised.
    InnerProduct,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L2 => "l2",
            Self::InnerProduct => "inner_product",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw unit of ingestion produced by a [`crate::loader::DocumentLoader`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub text: String,
    pub source: String,
    pub doc_type: DocType,
    pub path: String,
}

impl Document {
    pub fn new(source: impl Into<String>, doc_type: DocType, text: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            text: text.into(),
            path: source.clone(),
            source,
            doc_type,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

/// Provenance attached to every chunk.
///
/// `chunk_index`/`total_chunks` locate the chunk inside its parent document
/// so callers can restore document order after parallel chunking. Any extra
/// caller-supplied keys are carried through `extra` and flattened on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChunkMetadata {
    pub source: String,
    pub doc_type: DocType,
    pub path: String,
    #[serde(default)]
    pub chunk_index: usize,
    #[serde(default)]
    pub total_chunks: usize,
    #[serde(flatten, default)]
    pub extra: Meta,
}

impl ChunkMetadata {
    pub fn for_document(doc: &Document) -> Self {
        Self {
            source: doc.source.clone(),
            doc_type: doc.doc_type,
            path: doc.path.clone(),
            ..Self::default()
        }
    }
}

/// A bounded, sentence-aligned excerpt of one document; the unit that gets
/// embedded and indexed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// One ranked search result. `score` lies in `(0, 1]`, higher is better.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub chunk: Chunk,
    pub score: f32,
}

/// Turns a non-negative distance into a relevance score in `(0, 1]`.
///
/// Used by both the coarse search and the re-ranker so scores from either
/// stage are comparable. Negative distances (float noise) clamp to 1.0.
pub fn relevance_from_distance(distance: f32) -> f32 {
    if distance.is_nan() {
        return f32::MIN_POSITIVE;
    }
    (1.0 / (1.0 + distance.max(0.0))).max(f32::MIN_POSITIVE)
}
