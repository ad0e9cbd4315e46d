use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use ragidx_core::{Metric, Result};
use ragidx_vector::store::read_json;

/// Sidecar describing how the persisted index was built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    pub total_guidelines: usize,
    pub total_case_studies: usize,
    #[serde(default)]
    pub total_other: usize,
    pub embedding_model: String,
    pub dimension: usize,
    pub metric: Metric,
    pub chunk_size: usize,
    pub overlap: usize,
    pub built_at: DateTime<Utc>,
}

impl RunMetadata {
    pub fn total_chunks(&self) -> usize {
        self.total_guidelines + self.total_case_studies + self.total_other
    }

    /// Settings that differ from `previous`, one human-readable line each.
    /// Drift is reported, never reconciled.
    pub fn drift_from(&self, previous: &RunMetadata) -> Vec<String> {
        let mut drift = Vec::new();
        if self.embedding_model != previous.embedding_model {
            drift.push(format!(
                "embedding_model: {} -> {}",
                previous.embedding_model, self.embedding_model
            ));
        }
        if self.dimension != previous.dimension {
            drift.push(format!("dimension: {} -> {}", previous.dimension, self.dimension));
        }
        if self.metric != previous.metric {
            drift.push(format!("metric: {} -> {}", previous.metric, self.metric));
        }
        if self.chunk_size != previous.chunk_size {
            drift.push(format!(
                "chunk_size: {} -> {}",
                previous.chunk_size, self.chunk_size
            ));
        }
        if self.overlap != previous.overlap {
            drift.push(format!("overlap: {} -> {}", previous.overlap, self.overlap));
        }
        drift
    }
}

/// Reads `metadata.json`; a missing or unreadable file is `None`.
pub fn load_run_metadata(path: &Path) -> Option<RunMetadata> {
    if !path.exists() {
        return None;
    }
    read_json(path)
        .map_err(|e| warn!(path = %path.display(), error = %e, "ignoring unreadable run metadata"))
        .ok()
}

pub(crate) fn write_json_file<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    std::io::Write::flush(&mut writer)?;
    Ok(())
}
