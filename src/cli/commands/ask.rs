//! Ask command implementation.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat, QueryOptions};
use crate::services::RagPipeline;

#[derive(Debug, Args)]
pub struct AskArgs {
    /// The question to answer
    #[arg(required = true)]
    pub question: String,

    /// Number of chunks to retrieve (overrides config)
    #[arg(long, short = 'k')]
    pub top_k: Option<u32>,

    /// Include the retrieved context in the output
    #[arg(long, short = 'c')]
    pub show_context: bool,

    /// Wait for the full answer instead of streaming fragments
    #[arg(long)]
    pub no_stream: bool,
}

pub async fn handle_ask(args: AskArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);

    let pipeline = Arc::new(RagPipeline::new(config).context("failed to build pipeline")?);

    let spinner = progress_spinner("Loading model and index...");
    let warmed = pipeline.warm_up().await;
    spinner.finish_and_clear();
    warmed.context("pipeline initialization failed")?;

    if verbose {
        let health = pipeline.health().await;
        eprintln!(
            "Pipeline ready: {} chunks indexed",
            health.chunk_count
        );
    }

    let options = QueryOptions {
        include_context: args.show_context,
        top_k: args.top_k,
    };

    // Streaming only makes sense for incremental text output; structured
    // formats need the complete answer.
    if format == OutputFormat::Text && !args.no_stream {
        let mut stream = pipeline
            .query_stream(&args.question, &options)
            .await
            .context("query failed")?;

        if !stream.grounded {
            eprintln!(
                "{}",
                style("Warning: no relevant sources found; answer is not grounded in the corpus.")
                    .yellow()
            );
        }

        let mut stdout = std::io::stdout();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment.context("generation stream failed")?;
            write!(stdout, "{}", fragment)?;
            stdout.flush()?;
        }
        writeln!(stdout)?;

        if !stream.sources.is_empty() {
            writeln!(stdout)?;
            writeln!(stdout, "Sources")?;
            writeln!(stdout, "-------")?;
            for source in &stream.sources {
                writeln!(stdout, "  {}", source)?;
            }
        }
        return Ok(());
    }

    let answer = pipeline
        .query(&args.question, &options)
        .await
        .context("query failed")?;

    if !answer.grounded && format == OutputFormat::Text {
        eprintln!(
            "{}",
            style("Warning: no relevant sources found; answer is not grounded in the corpus.")
                .yellow()
        );
    }

    print!("{}", formatter.format_answer(&answer));
    Ok(())
}

fn progress_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner
}
