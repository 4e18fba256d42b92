//! CLI commands implementation.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{ArgGroup, Parser};
use console::style;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use figcrop::label::split_batch;
use figcrop::{
    Config, Document, ExtractionPipeline, ExtractionReport, LabelJob, OpenAiVision, OutputSpec,
    PdfDocument, PdftoppmRenderer,
};

use super::progress::{print_summary, ExtractionProgress};

#[derive(Parser, Debug)]
#[command(name = "figcrop")]
#[command(about = "Extract figures and tables from academic PDFs using a vision model")]
#[command(version)]
#[command(group(ArgGroup::new("labels").required(true).args(["label", "batch"])))]
pub struct Cli {
    /// PDF file to extract from
    pdf_path: PathBuf,

    /// Label to extract, e.g. "Figure 2(a)" or "Table 1 [content-only]"
    label: Option<String>,

    /// Output file (single label only)
    #[arg(short, long, conflicts_with_all = ["batch", "output_dir"])]
    output: Option<PathBuf>,

    /// Rendering resolution
    #[arg(long)]
    dpi: Option<u32>,

    /// Crop the figure body only, without caption, legend or notes
    #[arg(long)]
    no_extras: bool,

    /// Maximum assessment rounds per label
    #[arg(long)]
    max_rounds: Option<u32>,

    /// Comma-separated labels to extract in one pass
    #[arg(short, long)]
    batch: Option<String>,

    /// Output directory (default: extracted_figures/ next to the PDF)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Maximum concurrent vision-model calls
    #[arg(short, long)]
    workers: Option<usize>,

    /// First page to search (1-based)
    #[arg(long)]
    start_page: Option<u32>,

    /// Number of pages to search from the start page
    #[arg(long)]
    max_pages: Option<u32>,

    /// Cancel remaining work after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Configuration file (default: figcrop.toml in the working directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

impl Cli {
    /// Layer command-line flags over the loaded configuration.
    fn apply_to(&self, config: &mut Config) {
        let extract = &mut config.extract;
        if let Some(dpi) = self.dpi {
            extract.dpi = dpi;
        }
        if let Some(rounds) = self.max_rounds {
            extract.max_rounds = rounds;
        }
        if let Some(workers) = self.workers {
            extract.max_concurrent_calls = workers;
        }
        if let Some(page) = self.start_page {
            extract.start_page = page;
        }
        if let Some(pages) = self.max_pages {
            extract.max_pages = Some(pages);
        }
        if self.no_extras {
            extract.include_extras = false;
        }
    }

    fn jobs(&self) -> Vec<LabelJob> {
        match (&self.batch, &self.label) {
            (Some(batch), _) => split_batch(batch).into_iter().map(LabelJob::new).collect(),
            (None, Some(label)) => vec![LabelJob::new(label.clone())],
            (None, None) => Vec::new(),
        }
    }

    fn output(&self) -> OutputSpec {
        if let Some(path) = &self.output {
            return OutputSpec::File(path.clone());
        }
        match &self.output_dir {
            Some(dir) => OutputSpec::Directory(dir.clone()),
            None => OutputSpec::default_for(&self.pdf_path),
        }
    }
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let report = extract(cli).await?;
    print_summary(&report);

    if !report.all_saved() {
        std::process::exit(1);
    }
    Ok(())
}

async fn extract(cli: Cli) -> anyhow::Result<ExtractionReport> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_to(&mut config);
    config.validate()?;

    let vision = OpenAiVision::new(&config.vision).context("vision model unavailable")?;

    let jobs = cli.jobs();
    if jobs.is_empty() {
        bail!("no labels given");
    }

    let document = PdfDocument::open(&cli.pdf_path)
        .with_context(|| format!("cannot open {}", cli.pdf_path.display()))?;
    info!(
        "{}: {} pages, {} label(s), model {}",
        document.name(),
        document.page_count(),
        jobs.len(),
        config.vision.model
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let cancel_tx = Arc::new(cancel_tx);
    spawn_cancel_triggers(cancel_tx.clone(), cli.timeout);

    let (event_tx, event_rx) = mpsc::channel(64);
    let progress = ExtractionProgress::new(jobs.len() as u64);
    let progress_task = tokio::spawn(progress.drive(event_rx));

    let pipeline = ExtractionPipeline::new(
        Arc::new(document),
        Arc::new(PdftoppmRenderer::new()),
        Arc::new(vision),
        config.extract.clone(),
    )
    .with_events(event_tx)
    .with_cancel(cancel_rx);

    let output = cli.output();
    let result = pipeline.extract(jobs, &output).await;

    // Dropping the pipeline closes the event channel and ends the progress task.
    drop(pipeline);
    let _ = progress_task.await;

    if *cancel_tx.borrow() {
        eprintln!("{} Extraction cancelled", style("!").yellow());
    }
    Ok(result?)
}

/// How an interrupt watcher ended.
#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// The signal source stopped delivering signals.
    Closed,
    /// A second signal arrived while in-flight work was winding down.
    Forced,
}

/// The first signal cancels remaining work; a second one asks to quit now.
///
/// `next_signal` resolves to `false` when no more signals can arrive.
async fn watch_interrupts<F, Fut>(mut next_signal: F, cancel: &watch::Sender<bool>) -> Interrupt
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    if !next_signal().await {
        return Interrupt::Closed;
    }
    warn!("Interrupted; finishing in-flight calls (Ctrl-C again to quit)");
    let _ = cancel.send(true);

    if !next_signal().await {
        return Interrupt::Closed;
    }
    Interrupt::Forced
}

/// Signal cancellation on Ctrl-C, and after `timeout_secs` when given.
fn spawn_cancel_triggers(cancel: Arc<watch::Sender<bool>>, timeout_secs: Option<u64>) {
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = || async { tokio::signal::ctrl_c().await.is_ok() };
        if watch_interrupts(ctrl_c, &on_signal).await == Interrupt::Forced {
            eprintln!("{} Aborted", style("✗").red());
            std::process::exit(130);
        }
    });

    if let Some(secs) = timeout_secs {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!("Timeout of {}s reached; cancelling remaining work", secs);
            let _ = cancel.send(true);
        });
    }
}
