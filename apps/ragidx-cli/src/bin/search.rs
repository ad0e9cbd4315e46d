//! ragidx-search: query a persisted index.

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::warn;

use ragidx_cli::{init_tracing, load_settings, rerank_depth};
use ragidx_core::QueryResult;
use ragidx_embed::create_embedder;
use ragidx_pipeline::{load_run_metadata, load_search_index, METADATA_FILE};
use ragidx_retrieve::{Reranker, Retriever};

#[derive(Parser, Debug)]
#[command(name = "ragidx-search")]
#[command(version, about = "Search a ragidx index", long_about = None)]
struct Cli {
    query: String,

    /// Number of results; defaults to `retrieval.top_k`.
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Re-rank this many coarse candidates before keeping the top k;
    /// defaults to `retrieval.rerank_candidates`, 0 disables re-ranking.
    #[arg(short, long)]
    rerank: Option<usize>,

    #[arg(short, long, default_value = ".")]
    config_dir: PathBuf,

    /// Index directory; defaults to `index.output_dir`.
    #[arg(short, long)]
    index: Option<PathBuf>,

    #[arg(short, long)]
    json: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let settings = load_settings(&cli.config_dir)?;
    let index_dir = cli.index.unwrap_or_else(|| settings.index.output_dir.clone());
    let top_k = cli.top_k.unwrap_or(settings.retrieval.top_k);

    let Some((index, chunks)) = load_search_index(&index_dir)? else {
        bail!("no usable index in {}; run ragidx-index first", index_dir.display());
    };

    let embedder = create_embedder(&settings.embedding)?;
    if let Some(meta) = load_run_metadata(&index_dir.join(METADATA_FILE)) {
        if meta.embedding_model != embedder.model_name() {
            warn!(
                stored = %meta.embedding_model,
                configured = embedder.model_name(),
                "index was built with a different model"
            );
        }
    }

    let retriever = Retriever::new(embedder.clone(), index.metric());
    retriever.replace_index(index, chunks)?;

    let results = match rerank_depth(cli.rerank, &settings) {
        Some(candidates) => {
            let coarse = retriever.hybrid_search(&cli.query, candidates.max(top_k))?;
            Reranker::new(embedder).rerank(&cli.query, coarse, top_k)
        }
        None => retriever.hybrid_search(&cli.query, top_k)?,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_results(&cli.query, &results);
    }
    if results.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_results(query: &str, results: &[QueryResult]) {
    if results.is_empty() {
        println!("No results found for: \"{query}\"");
        return;
    }
    println!("\nFound {} results for: \"{query}\"", results.len());
    for (i, r) in results.iter().enumerate() {
        let m = &r.chunk.metadata;
        println!(
            "\n  {}. score={:.4}  {}  [{}] chunk {}/{}",
            i + 1,
            r.score,
            m.source,
            m.doc_type,
            m.chunk_index + 1,
            m.total_chunks
        );
        println!("     {}", r.chunk.text);
    }
}
