//! Batch extraction: one text scan per document, one refinement loop per label.
//!
//! The page index is built once on a blocking thread and shared read-only
//! with every label's loop. Loops run concurrently on a bounded worker pool
//! sized by `max_concurrent_calls`; each loop makes at most one model call at
//! a time, so the pool size is also the cap on in-flight model calls.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::png::CompressionType;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, info, warn};

use crate::assessor::QualityAssessor;
use crate::bbox::{BoundingBox, BoxMode};
use crate::config::ExtractConfig;
use crate::document::{Document, DocumentError};
use crate::index::{CandidatePages, CandidateSource, PageTextIndex};
use crate::label::{FigureLabel, LabelRequest};
use crate::locator::BoundingBoxLocator;
use crate::refine::{
    FinalCrop, LoopContext, LoopOutcome, LoopReport, LoopSettings, LoopStats, RefinementLoop,
};
use crate::render::{encode_png, PageRenderer};
use crate::vision::VisionModel;

/// Directory created next to the PDF when no output location is given.
pub const DEFAULT_OUTPUT_DIR: &str = "extracted_figures";

/// Errors that stop a whole extraction run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("Cannot create output location {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("Page index task failed: {0}")]
    IndexTask(String),
}

/// Terminal status of one requested label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Success,
    LowQualityAccepted,
    Failed,
    Skipped,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Success => "success",
            ExtractionStatus::LowQualityAccepted => "low_quality_accepted",
            ExtractionStatus::Failed => "failed",
            ExtractionStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a label failed or was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    NotFound,
    Cancelled,
    Render(String),
    Write(String),
    InvalidLabel(String),
    Duplicate,
    Internal(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotFound => write!(f, "not found on any candidate page"),
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::Render(e) => write!(f, "render failed: {}", e),
            FailureReason::Write(e) => write!(f, "write failed: {}", e),
            FailureReason::InvalidLabel(e) => write!(f, "{}", e),
            FailureReason::Duplicate => write!(f, "duplicate of an earlier label"),
            FailureReason::Internal(e) => write!(f, "internal error: {}", e),
        }
    }
}

/// Result for one requested label.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    /// Label exactly as requested.
    pub label: String,
    pub canonical: Option<FigureLabel>,
    pub mode: BoxMode,
    pub page: Option<u32>,
    pub bbox: Option<BoundingBox>,
    pub score: Option<u8>,
    pub output_path: Option<PathBuf>,
    pub status: ExtractionStatus,
    pub reason: Option<FailureReason>,
    pub stats: LoopStats,
}

impl ExtractionResult {
    fn unresolved(
        label: &str,
        canonical: Option<FigureLabel>,
        mode: BoxMode,
        status: ExtractionStatus,
        reason: FailureReason,
    ) -> Self {
        Self {
            label: label.to_string(),
            canonical,
            mode,
            page: None,
            bbox: None,
            score: None,
            output_path: None,
            status,
            reason: Some(reason),
            stats: LoopStats::default(),
        }
    }

    /// A file was written for this label.
    pub fn is_saved(&self) -> bool {
        matches!(
            self.status,
            ExtractionStatus::Success | ExtractionStatus::LowQualityAccepted
        ) && self.output_path.is_some()
    }

    pub fn is_duplicate(&self) -> bool {
        self.reason == Some(FailureReason::Duplicate)
    }
}

/// Progress notifications for a running batch.
#[derive(Debug, Clone)]
pub enum ExtractionEvent {
    IndexBuilt {
        page_count: u32,
        text_pages: u32,
        full_scan: bool,
    },
    LabelStarted {
        label: String,
        candidates: usize,
        source: CandidateSource,
    },
    PageTried {
        label: String,
        page: u32,
    },
    RoundAssessed {
        label: String,
        page: u32,
        round: u32,
        score: Option<u8>,
    },
    LabelFinished {
        label: String,
        status: ExtractionStatus,
    },
}

/// One label to extract, with an optional mode override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelJob {
    pub label: String,
    /// Wins over any `[content-only]` style annotation in `label`.
    pub mode: Option<BoxMode>,
}

impl LabelJob {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            mode: None,
        }
    }

    pub fn with_mode(mut self, mode: BoxMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Where extracted images go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSpec {
    /// Exact file path; valid for a single label only.
    File(PathBuf),
    /// Directory receiving canonical `Figure_N.png` style names.
    Directory(PathBuf),
}

impl OutputSpec {
    /// `<pdf dir>/extracted_figures/`.
    pub fn default_for(pdf_path: &Path) -> Self {
        let parent = pdf_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        OutputSpec::Directory(parent.join(DEFAULT_OUTPUT_DIR))
    }

    pub fn path_for(&self, label: &FigureLabel) -> PathBuf {
        match self {
            OutputSpec::File(path) => path.clone(),
            OutputSpec::Directory(dir) => dir.join(label.file_name()),
        }
    }

    fn prepare(&self) -> Result<(), PipelineError> {
        let dir = match self {
            OutputSpec::File(path) => match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => return Ok(()),
            },
            OutputSpec::Directory(dir) => dir.as_path(),
        };
        std::fs::create_dir_all(dir).map_err(|source| PipelineError::Output {
            path: dir.to_path_buf(),
            source,
        })
    }
}

/// Results of a batch, in request order.
#[derive(Debug, Clone)]
pub struct ExtractionReport {
    pub results: Vec<ExtractionResult>,
    pub page_count: u32,
    pub text_pages: u32,
    /// The document had no text layer; every label scanned all pages.
    pub full_scan: bool,
}

impl ExtractionReport {
    /// Result for a requested label string.
    pub fn get(&self, label: &str) -> Option<&ExtractionResult> {
        self.results.iter().find(|r| r.label == label)
    }

    /// Every requested label has a saved file. Duplicates count through
    /// the earlier request they repeat.
    pub fn all_saved(&self) -> bool {
        self.results
            .iter()
            .all(|r| r.is_saved() || r.is_duplicate())
    }

    pub fn with_status(&self, status: ExtractionStatus) -> impl Iterator<Item = &ExtractionResult> {
        self.results.iter().filter(move |r| r.status == status)
    }

    /// Labels that need manual handling: failed, or skipped for a reason
    /// other than repeating an earlier request.
    pub fn needs_attention(&self) -> impl Iterator<Item = &ExtractionResult> {
        self.results.iter().filter(|r| {
            matches!(
                r.status,
                ExtractionStatus::Failed | ExtractionStatus::Skipped
            ) && !r.is_duplicate()
        })
    }
}

/// Extracts labelled figures and tables from one document.
pub struct ExtractionPipeline {
    document: Arc<dyn Document>,
    renderer: Arc<dyn PageRenderer>,
    model: Arc<dyn VisionModel>,
    config: ExtractConfig,
    events: Option<mpsc::Sender<ExtractionEvent>>,
    cancel: watch::Receiver<bool>,
}

impl ExtractionPipeline {
    pub fn new(
        document: Arc<dyn Document>,
        renderer: Arc<dyn PageRenderer>,
        model: Arc<dyn VisionModel>,
        config: ExtractConfig,
    ) -> Self {
        // Never signalled unless `with_cancel` replaces it.
        let (_tx, cancel) = watch::channel(false);
        Self {
            document,
            renderer,
            model,
            config,
            events: None,
            cancel,
        }
    }

    pub fn with_events(mut self, events: mpsc::Sender<ExtractionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Stop loops at their next round boundary once `cancel` turns true.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    async fn emit(&self, event: ExtractionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Extract every job, writing images according to `output`.
    ///
    /// Per-label failures are reported in the returned report; only output
    /// preparation and index construction failures abort the run.
    pub async fn extract(
        &self,
        jobs: Vec<LabelJob>,
        output: &OutputSpec,
    ) -> Result<ExtractionReport, PipelineError> {
        if matches!(output, OutputSpec::File(_)) && jobs.len() > 1 {
            return Err(PipelineError::InvalidOutput(
                "an output file path takes exactly one label; use an output directory".into(),
            ));
        }
        output.prepare()?;

        let document = self.document.clone();
        let index = tokio::task::spawn_blocking(move || PageTextIndex::build(document.as_ref()))
            .await
            .map_err(|e| PipelineError::IndexTask(e.to_string()))?;
        let index = Arc::new(index);

        self.emit(ExtractionEvent::IndexBuilt {
            page_count: index.page_count(),
            text_pages: index.text_pages(),
            full_scan: index.needs_full_scan(),
        })
        .await;

        let default_mode = BoxMode::from_include_extras(self.config.include_extras);
        let window = self.config.page_window(self.document.page_count());
        let retry = self.config.retry_policy();
        let ctx = Arc::new(LoopContext {
            document: self.document.clone(),
            renderer: self.renderer.clone(),
            locator: BoundingBoxLocator::new(self.model.clone(), retry),
            assessor: QualityAssessor::new(self.model.clone(), retry),
            settings: LoopSettings::from(&self.config),
        });
        let workers = Arc::new(Semaphore::new(self.config.max_concurrent_calls.max(1)));

        let mut slots: Vec<Option<ExtractionResult>> = Vec::with_capacity(jobs.len());
        let mut seen = HashSet::new();
        let mut handles = Vec::new();

        for (slot, job) in jobs.iter().enumerate() {
            let request = match LabelRequest::parse(&job.label) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Skipping {:?}: {}", job.label, e);
                    let result = ExtractionResult::unresolved(
                        &job.label,
                        None,
                        job.mode.unwrap_or(default_mode),
                        ExtractionStatus::Skipped,
                        FailureReason::InvalidLabel(e.to_string()),
                    );
                    self.finished(&result).await;
                    slots.push(Some(result));
                    continue;
                }
            };
            let label = request.label;
            let mode = job.mode.unwrap_or_else(|| request.mode_or(default_mode));

            // Modes share the canonical filename, so a label is extracted once.
            if !seen.insert(label) {
                debug!("Skipping duplicate {} ({})", label, mode);
                let result = ExtractionResult::unresolved(
                    &job.label,
                    Some(label),
                    mode,
                    ExtractionStatus::Skipped,
                    FailureReason::Duplicate,
                );
                self.finished(&result).await;
                slots.push(Some(result));
                continue;
            }

            slots.push(None);
            let pages =
                CandidatePages::resolve(&index, &label, window, self.config.full_scan_fallback);
            self.emit(ExtractionEvent::LabelStarted {
                label: job.label.clone(),
                candidates: pages.total(),
                source: pages.source(),
            })
            .await;
            debug!(
                "{}: {} candidate page(s) ({:?})",
                label,
                pages.total(),
                pages.source()
            );

            let mut refinement = RefinementLoop::new(
                ctx.clone(),
                job.label.clone(),
                label,
                mode,
                pages,
                self.cancel.clone(),
            );
            if let Some(tx) = &self.events {
                refinement = refinement.with_events(tx.clone());
            }

            let key = job.label.clone();
            let path = output.path_for(&label);
            let workers = workers.clone();
            let events = self.events.clone();
            let handle = tokio::spawn(async move {
                let report = match workers.acquire_owned().await {
                    Ok(_permit) => refinement.run().await,
                    Err(_) => LoopReport {
                        outcome: LoopOutcome::Cancelled,
                        stats: LoopStats::default(),
                    },
                };
                let result =
                    finalize(&key, label, mode, report.outcome, report.stats, path).await;
                if let Some(tx) = events {
                    let _ = tx.send(finished_event(&result)).await;
                }
                result
            });
            handles.push((slot, job.label.clone(), label, mode, handle));
        }

        for (slot, key, label, mode, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    let result = ExtractionResult::unresolved(
                        &key,
                        Some(label),
                        mode,
                        ExtractionStatus::Failed,
                        FailureReason::Internal(e.to_string()),
                    );
                    self.finished(&result).await;
                    result
                }
            };
            slots[slot] = Some(result);
        }

        Ok(ExtractionReport {
            results: slots.into_iter().flatten().collect(),
            page_count: index.page_count(),
            text_pages: index.text_pages(),
            full_scan: index.needs_full_scan(),
        })
    }

    async fn finished(&self, result: &ExtractionResult) {
        self.emit(finished_event(result)).await;
    }
}

fn finished_event(result: &ExtractionResult) -> ExtractionEvent {
    ExtractionEvent::LabelFinished {
        label: result.label.clone(),
        status: result.status,
    }
}

/// Turn a loop outcome into a result, writing the crop when there is one.
async fn finalize(
    key: &str,
    label: FigureLabel,
    mode: BoxMode,
    outcome: LoopOutcome,
    stats: LoopStats,
    path: PathBuf,
) -> ExtractionResult {
    let (crop, status) = match outcome {
        LoopOutcome::Accepted(crop) => (crop, ExtractionStatus::Success),
        LoopOutcome::Exhausted(crop) => (crop, ExtractionStatus::LowQualityAccepted),
        other => {
            let reason = match other {
                LoopOutcome::Cancelled => FailureReason::Cancelled,
                LoopOutcome::RenderFailed { page, reason } => {
                    FailureReason::Render(format!("page {}: {}", page, reason))
                }
                _ => FailureReason::NotFound,
            };
            let mut result = ExtractionResult::unresolved(
                key,
                Some(label),
                mode,
                ExtractionStatus::Failed,
                reason,
            );
            result.stats = stats;
            return result;
        }
    };

    let FinalCrop {
        page,
        bbox,
        score,
        image,
        ..
    } = crop;
    let score = score.and_then(|s| s.score);
    let written = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || save_png(&path, &image)).await
    };

    let mut result = ExtractionResult {
        label: key.to_string(),
        canonical: Some(label),
        mode,
        page: Some(page),
        bbox: Some(bbox),
        score,
        output_path: None,
        status,
        reason: None,
        stats,
    };

    match written {
        Ok(Ok(())) => {
            info!("Saved {} to {}", label, path.display());
            result.output_path = Some(path);
        }
        Ok(Err(e)) => {
            warn!("Failed to write {}: {}", path.display(), e);
            result.status = ExtractionStatus::Failed;
            result.reason = Some(FailureReason::Write(e));
        }
        Err(e) => {
            result.status = ExtractionStatus::Failed;
            result.reason = Some(FailureReason::Internal(e.to_string()));
        }
    }
    result
}

/// Write an optimized PNG, replacing any previous file.
fn save_png(path: &Path, image: &image::RgbImage) -> Result<(), String> {
    let bytes = encode_png(image, CompressionType::Best).map_err(|e| e.to_string())?;
    std::fs::write(path, bytes).map_err(|e| e.to_string())
}
