//! Error taxonomy shared by every ragidx crate.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index pair incomplete: {0}")]
    MissingPair(String),

    #[error("Index mismatch: {vectors} vectors but {chunks} chunks")]
    IndexMismatch { vectors: usize, chunks: usize },

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Vector index error: {0}")]
    Index(String),

    #[error("Pipeline stage '{stage}' failed: {message}")]
    Pipeline { stage: &'static str, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn embedding(err: impl std::fmt::Display) -> Self {
        Self::Embedding(err.to_string())
    }

    pub fn index(err: impl std::fmt::Display) -> Self {
        Self::Index(err.to_string())
    }

    pub fn pipeline(stage: &'static str, msg: impl Into<String>) -> Self {
        Self::Pipeline {
            stage,
            message: msg.into(),
        }
    }

    /// Configuration problems are never retried.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::DimensionMismatch { .. } | Self::MissingPair(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
