//! Ingestion binary entry point.
//!
//! Loads an arXiv metadata export (`papers.json`) and writes every paper
//! with its denormalized copies into the configured store.
//!
//! # Examples
//!
//! Load into the local snapshot store:
//! ```bash
//! ingest --input papers.json
//! ```
//!
//! Load into DynamoDB Local, creating the table:
//! ```bash
//! ingest --input papers.json --backend dynamodb --endpoint http://localhost:8000 --create-table
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use arxiv_paper_store::{
    config::{RetryArgs, StoreArgs, StoreSettings},
    ingestion::{IngestionPipeline, IngestionStats, DEFAULT_CONCURRENCY},
    models::ItemKind,
    provider::{json::JsonFilePaperProvider, PaperProvider},
    retry::RetryPolicy,
    storage::{DynamicStore, ItemStore},
    writer::WriteCoordinator,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Ingestion CLI for loading paper metadata into the store
#[derive(Parser, Debug)]
#[command(
    name = "ingest",
    version,
    about = "Load arXiv paper metadata into the denormalized store",
    long_about = "Reads papers.json (id, title, authors, summary, categories, published) and writes each paper as a canonical item plus one copy per category, author and keyword.

EXAMPLES:
  Load into the local snapshot store:
    ingest --input papers.json

  Load the first 100 papers with debug logging:
    ingest --input papers.json --limit 100 --log-level debug

  Load into DynamoDB:
    ingest --input papers.json --backend dynamodb --table arxiv-papers --create-table"
)]
struct IngestArgs {
    /// Input JSON file containing paper metadata
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    retry: RetryArgs,

    /// Papers written concurrently
    #[arg(long, value_name = "N", default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Papers per progress update
    #[arg(long, value_name = "N", default_value = "100")]
    batch_size: usize,

    /// Only ingest the first N papers
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// Logging verbosity level
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging subsystem with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

/// Create a progress bar for tracking ingestion
fn create_progress_bar(total: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} papers | Written: {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("##-"),
    );
    Ok(pb)
}

fn print_summary(stats: &IngestionStats, elapsed: std::time::Duration) {
    println!("\n╔════════════════════════════════════════╗");
    println!("║      Ingestion Completed               ║");
    println!("╠════════════════════════════════════════╣");
    println!("║ Total processed:      {:>16} ║", stats.total_processed);
    println!("║ Papers written:       {:>16} ║", stats.written);
    println!("║   of which replaced:  {:>16} ║", stats.replaced);
    println!("║ Partial writes:       {:>16} ║", stats.partial);
    println!("║ Invalid records:      {:>16} ║", stats.invalid);
    println!("║ Failed:               {:>16} ║", stats.failed);
    println!("╠════════════════════════════════════════╣");
    println!("║ Canonical items:      {:>16} ║", stats.items_of(ItemKind::Canonical));
    println!("║ Category items:       {:>16} ║", stats.items_of(ItemKind::Category));
    println!("║ Author items:         {:>16} ║", stats.items_of(ItemKind::Author));
    println!("║ Keyword items:        {:>16} ║", stats.items_of(ItemKind::Keyword));
    println!("║ Total items:          {:>16} ║", stats.total_items());
    println!("║ Storage multiplier:   {:>15.1}x ║", stats.storage_multiplier());
    println!("║ Elapsed time:         {:>13.2?} ║", elapsed);
    println!("╚════════════════════════════════════════╝");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = IngestArgs::parse();
    init_logging(&args.log_level).context("Failed to initialize logging")?;

    info!("Starting paper ingestion");
    debug!("CLI arguments: {:?}", args);
    let start_time = Instant::now();

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {:?}", args.input);
    }

    let settings = StoreSettings::from(&args.store);
    let store = Arc::new(settings.open().await.context("Failed to open store")?);
    info!("Using {} store", store.name());

    let policy = RetryPolicy::from(&args.retry);
    let writer = Arc::new(WriteCoordinator::new(store.clone(), policy));
    let pipeline =
        IngestionPipeline::new(writer, args.concurrency).context("Failed to create pipeline")?;

    let provider = JsonFilePaperProvider::from_file(&args.input)
        .await
        .with_context(|| format!("Failed to load papers from {:?}", args.input))?;
    let records = match args.limit {
        Some(limit) => provider.fetch_papers_limit(limit).await?,
        None => provider.fetch_papers().await?,
    };
    info!("Found {} records from {}", records.len(), provider.name());

    if records.is_empty() {
        warn!("No papers found in input file");
        return Ok(());
    }

    let progress = create_progress_bar(records.len())?;
    progress.set_message("0");

    let mut stats = IngestionStats::new();
    for chunk in records.chunks(args.batch_size.max(1)) {
        stats.merge(pipeline.ingest_batch(chunk).await);
        progress.inc(chunk.len() as u64);
        progress.set_message(stats.written.to_string());
    }
    progress.finish_with_message(stats.written.to_string());

    if let DynamicStore::Memory(memory) = store.as_ref() {
        memory
            .save_snapshot(&settings.snapshot_path)
            .await
            .with_context(|| format!("Failed to save snapshot to {:?}", settings.snapshot_path))?;
        info!(
            "Saved {} items to {:?}",
            memory.item_count(),
            settings.snapshot_path
        );
    }

    print_summary(&stats, start_time.elapsed());

    for failure in &stats.failures {
        warn!("{}: {}", failure.paper_id, failure.reason);
    }
    if stats.partial > 0 {
        warn!(
            "{} papers were partially written; re-run ingestion to complete them",
            stats.partial
        );
    }

    info!("Ingestion completed");
    Ok(())
}
