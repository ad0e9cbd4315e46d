//! ragidx-index: chunk, embed and persist a document corpus.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use ragidx_cli::{index_is_current, index_pipeline, init_tracing, load_settings};
use ragidx_core::loader::DirectoryLoader;
use ragidx_embed::create_embedder;
use ragidx_pipeline::PipelineSettings;

#[derive(Parser, Debug)]
#[command(name = "ragidx-index")]
#[command(
    version,
    about = "Build the vector index for a document corpus",
    long_about = None
)]
struct Cli {
    /// Corpus directory; defaults to `index.data_dir` from configuration.
    data_dir: Option<PathBuf>,

    /// Directory holding config.toml and its overlays.
    #[arg(short, long, default_value = ".")]
    config_dir: PathBuf,

    /// Where artifacts are written; defaults to `index.output_dir`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Rebuild even if an up-to-date index exists.
    #[arg(short, long)]
    force: bool,

    /// Only index the first N files (sorted by path).
    #[arg(long)]
    limit: Option<usize>,

    /// Embed every chunk again instead of reusing `embedding.cache_dir`.
    #[arg(long)]
    no_cache: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut settings = load_settings(&cli.config_dir)?;
    if let Some(out) = cli.output {
        settings.index.output_dir = out;
    }
    let data_dir = cli.data_dir.unwrap_or_else(|| settings.index.data_dir.clone());

    let embedder = create_embedder(&settings.embedding)?;
    let pipeline_settings = PipelineSettings::from_settings(&settings);

    let current = index_is_current(
        &pipeline_settings.output_dir,
        embedder.model_name(),
        embedder.dimension(),
    );
    if !cli.force && current {
        info!(
            dir = %pipeline_settings.output_dir.display(),
            "index is up to date; pass --force to rebuild"
        );
        return Ok(());
    }

    let mut loader = DirectoryLoader::new(&data_dir);
    if let Some(limit) = cli.limit {
        loader = loader.with_limit(limit);
    }

    println!("ragidx indexer\n==============");
    println!("Corpus: {}", data_dir.display());
    println!("Output: {}", pipeline_settings.output_dir.display());
    println!("Model:  {} (d={})", embedder.model_name(), embedder.dimension());

    let use_cache = !cli.no_cache;
    if use_cache {
        println!("Cache:  {}", settings.embedding.cache_dir.display());
    }
    let pipeline = index_pipeline(loader, embedder, &settings, use_cache);
    let data = pipeline.process_documents()?;

    println!("\nIndexed {} chunks", data.total());
    println!("  guidelines:   {}", data.guidelines.len());
    println!("  case studies: {}", data.case_studies.len());
    println!("  other:        {}", data.other.len());
    Ok(())
}
