//! Index command implementation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::RagPipeline;

#[derive(Debug, Args)]
pub struct IndexArgs {
    /// Path to the corpus directory (or a single file)
    #[arg(required = true)]
    pub path: PathBuf,

    /// File patterns to exclude (can be specified multiple times)
    #[arg(long, short = 'e')]
    pub exclude: Vec<String>,
}

pub async fn handle_index(args: IndexArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let mut config = Config::load()?;
    config.index.exclude_patterns.extend(args.exclude);
    let formatter = get_formatter(format);

    let path = args.path.canonicalize().context("invalid corpus path")?;
    if verbose {
        eprintln!("Indexing corpus at {}", path.display());
    }

    let pipeline = Arc::new(RagPipeline::new(config).context("failed to build pipeline")?);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Chunking, embedding, and indexing...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let result = pipeline.index_corpus(&path).await;
    spinner.finish_and_clear();

    let report = result.context("index build failed")?;
    print!("{}", formatter.format_index_report(&report));

    if report.skipped_chunks > 0 {
        eprintln!(
            "Warning: {} chunks could not be embedded and were skipped.",
            report.skipped_chunks
        );
    }

    Ok(())
}
