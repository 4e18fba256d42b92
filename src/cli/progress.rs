//! Progress bar and end-of-run summary.

use console::{style, StyledObject};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use figcrop::index::CandidateSource;
use figcrop::{ExtractionEvent, ExtractionReport, ExtractionResult, ExtractionStatus};

/// Renders pipeline events as a progress bar, one tick per finished label.
pub struct ExtractionProgress {
    pb: ProgressBar,
}

impl ExtractionProgress {
    pub fn new(total: u64) -> Self {
        let pb = ProgressBar::new(total);
        if let Ok(template) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(template.progress_chars("#>-"));
        }
        Self { pb }
    }

    /// Consume events until the sender side is dropped.
    pub async fn drive(self, mut events: mpsc::Receiver<ExtractionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        self.pb.finish_and_clear();
    }

    fn handle(&self, event: ExtractionEvent) {
        match event {
            ExtractionEvent::IndexBuilt {
                page_count,
                text_pages,
                full_scan,
            } => {
                if full_scan {
                    self.pb.println(format!(
                        "{} No text layer in {} pages; searching every page in order",
                        style("!").yellow(),
                        page_count
                    ));
                } else {
                    self.pb.set_message(format!(
                        "indexed {}/{} pages with text",
                        text_pages, page_count
                    ));
                }
            }
            ExtractionEvent::LabelStarted {
                label,
                candidates,
                source,
            } => {
                let how = match source {
                    CandidateSource::Indexed => "candidate",
                    CandidateSource::FullScan => "scanned",
                };
                self.pb
                    .set_message(format!("{}: {} {} page(s)", label, candidates, how));
            }
            ExtractionEvent::PageTried { label, page } => {
                self.pb.set_message(format!("{}: page {}", label, page));
            }
            ExtractionEvent::RoundAssessed {
                label,
                page,
                round,
                score,
            } => {
                let score = score
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "?".to_string());
                self.pb.set_message(format!(
                    "{}: page {} round {} score {}",
                    label, page, round, score
                ));
            }
            ExtractionEvent::LabelFinished { label, status } => {
                self.pb.println(format!("{} {}", status_icon(status), label));
                self.pb.inc(1);
            }
        }
    }
}

fn status_icon(status: ExtractionStatus) -> StyledObject<&'static str> {
    match status {
        ExtractionStatus::Success => style("✓").green(),
        ExtractionStatus::LowQualityAccepted => style("!").yellow(),
        ExtractionStatus::Failed => style("✗").red(),
        ExtractionStatus::Skipped => style("-").dim(),
    }
}

fn describe(result: &ExtractionResult) -> String {
    let mut parts = Vec::new();
    if let Some(page) = result.page {
        parts.push(format!("page {}", page));
    }
    if let Some(score) = result.score {
        parts.push(format!("score {}", score));
    }
    parts.push(format!("{} round(s)", result.stats.rounds));
    parts.join(", ")
}

/// Print per-label outcomes and the list of labels needing manual handling.
pub fn print_summary(report: &ExtractionReport) {
    println!();
    for result in &report.results {
        match (&result.output_path, &result.reason) {
            (Some(path), _) => println!(
                "{} {} {} {} ({})",
                status_icon(result.status),
                result.label,
                style("→").dim(),
                path.display(),
                describe(result)
            ),
            (None, Some(reason)) => println!(
                "{} {}: {}",
                status_icon(result.status),
                result.label,
                reason
            ),
            (None, None) => println!("{} {}", status_icon(result.status), result.label),
        }
    }

    let success = report.with_status(ExtractionStatus::Success).count();
    let low: Vec<_> = report
        .with_status(ExtractionStatus::LowQualityAccepted)
        .map(|r| r.label.as_str())
        .collect();
    let attention: Vec<_> = report.needs_attention().map(|r| r.label.as_str()).collect();

    println!();
    println!(
        "{} {}/{} extracted",
        style("✓").green(),
        success + low.len(),
        report.results.len()
    );
    if report.full_scan {
        println!(
            "{} Document has no text layer; all {} pages were searched",
            style("→").cyan(),
            report.page_count
        );
    }
    if !low.is_empty() {
        println!(
            "{} Low confidence, check manually: {}",
            style("!").yellow(),
            low.join(", ")
        );
    }
    if !attention.is_empty() {
        println!(
            "{} Needs manual handling: {}",
            style("✗").red(),
            attention.join(", ")
        );
    }
}
