//! Offline indexing pipeline: load, chunk, embed, build and persist.

pub mod metadata;
pub mod pipeline;

pub use metadata::{load_run_metadata, RunMetadata};
pub use pipeline::{
    load_processed_data, load_search_index, IndexPipeline, PipelineSettings, ProcessedData,
    DOCUMENTS_FILE, INDEX_FILE, METADATA_FILE,
};
