//! Per-label refinement state machine.
//!
//! ```text
//! Init -> Locating -> Assessing -> Accepted
//!  ^          |           |
//!  |          |           +-> Refining -> Assessing (corrected box)
//!  |          |           |       |
//!  |          |           |       +----> Locating (no correction, same page)
//!  |          |           +-> Exhausted (round budget spent, or converged)
//!  +----------+ (not found: next candidate page)
//! ```
//!
//! The round budget counts assess calls only. Moving to another candidate
//! page never consumes a round. The best assessed box is carried across
//! pages and kept when the pages or the round budget run out. Cancellation is checked before every render
//! and model call, never in the middle of one.

use std::sync::Arc;

use image::RgbImage;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::assessor::{QualityAssessor, QualityScore};
use crate::bbox::{crop, BoundingBox, BoxMode, DEFAULT_PADDING, SUBFIGURE_PADDING};
use crate::config::ExtractConfig;
use crate::document::Document;
use crate::index::CandidatePages;
use crate::label::FigureLabel;
use crate::locator::BoundingBoxLocator;
use crate::pipeline::ExtractionEvent;
use crate::render::{PageRenderer, RenderedPage};

/// Knobs for one refinement loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub max_rounds: u32,
    pub quality_threshold: u8,
    /// Corrections moving no edge at least this far (0-1000 units) end the loop.
    pub convergence_delta: f64,
    pub dpi: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        (&ExtractConfig::default()).into()
    }
}

impl From<&ExtractConfig> for LoopSettings {
    fn from(config: &ExtractConfig) -> Self {
        Self {
            max_rounds: config.max_rounds.max(1),
            quality_threshold: config.quality_threshold,
            convergence_delta: config.convergence_delta,
            dpi: config.dpi,
        }
    }
}

/// Everything a loop needs that is shared across all labels of a batch.
pub struct LoopContext {
    pub document: Arc<dyn Document>,
    pub renderer: Arc<dyn PageRenderer>,
    pub locator: BoundingBoxLocator,
    pub assessor: QualityAssessor,
    pub settings: LoopSettings,
}

/// Counters for one loop, used by tests and the batch summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Assess calls made (the round budget).
    pub rounds: u32,
    pub locate_calls: u32,
    pub pages_tried: u32,
    pub renders: u32,
}

/// The box a loop settled on, cropped from the original render.
#[derive(Debug, Clone)]
pub struct FinalCrop {
    pub page: u32,
    pub bbox: BoundingBox,
    /// Score of the chosen box (`None` if its assessment failed).
    pub score: Option<QualityScore>,
    pub image: RgbImage,
    /// Stopped because a correction barely moved the box.
    pub converged: bool,
}

/// Terminal state of a loop.
#[derive(Debug, Clone)]
pub enum LoopOutcome {
    /// A box scored at or above the threshold.
    Accepted(FinalCrop),
    /// No box reached the threshold; the best one is kept.
    Exhausted(FinalCrop),
    /// Every candidate page was tried without locating the label.
    NotFound,
    /// The batch was cancelled before the loop finished.
    Cancelled,
    /// A page could not be rendered or cropped.
    RenderFailed { page: u32, reason: String },
}

impl LoopOutcome {
    pub fn crop(&self) -> Option<&FinalCrop> {
        match self {
            LoopOutcome::Accepted(c) | LoopOutcome::Exhausted(c) => Some(c),
            _ => None,
        }
    }
}

/// Outcome plus the counters that produced it.
#[derive(Debug, Clone)]
pub struct LoopReport {
    pub outcome: LoopOutcome,
    pub stats: LoopStats,
}

enum State {
    Init,
    Locating(Arc<RenderedPage>),
    Assessing(Arc<RenderedPage>, BoundingBox),
    Refining(Arc<RenderedPage>, BoundingBox, QualityScore),
    Accepted(Arc<RenderedPage>, BoundingBox, QualityScore),
    /// Keep the best box; `true` when a correction barely moved it.
    Exhausted(bool),
    Done(LoopOutcome),
}

/// Highest-scoring box so far, with the render it was drawn on.
struct Best {
    page: Arc<RenderedPage>,
    bbox: BoundingBox,
    score: QualityScore,
}

impl State {
    /// States whose next step renders a page or calls the model.
    fn makes_calls(&self) -> bool {
        matches!(
            self,
            State::Init | State::Locating(_) | State::Assessing(..)
        )
    }
}

/// One label's walk through its candidate pages.
pub struct RefinementLoop {
    ctx: Arc<LoopContext>,
    /// Requested label string, used in events.
    key: String,
    label: FigureLabel,
    mode: BoxMode,
    pages: CandidatePages,
    cancel: watch::Receiver<bool>,
    events: Option<mpsc::Sender<ExtractionEvent>>,
    stats: LoopStats,
    best: Option<Best>,
}

impl RefinementLoop {
    pub fn new(
        ctx: Arc<LoopContext>,
        key: impl Into<String>,
        label: FigureLabel,
        mode: BoxMode,
        pages: CandidatePages,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ctx,
            key: key.into(),
            label,
            mode,
            pages,
            cancel,
            events: None,
            stats: LoopStats::default(),
            best: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::Sender<ExtractionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Drive the state machine to a terminal state.
    pub async fn run(mut self) -> LoopReport {
        let mut state = State::Init;
        loop {
            if state.makes_calls() && self.is_cancelled() {
                info!("{}: cancelled after {} rounds", self.label, self.stats.rounds);
                state = State::Done(LoopOutcome::Cancelled);
            }

            state = match state {
                State::Done(outcome) => {
                    return LoopReport {
                        outcome,
                        stats: self.stats,
                    }
                }
                State::Init => self.next_page().await,
                State::Locating(page) => self.locate(page).await,
                State::Assessing(page, candidate) => self.assess(page, candidate).await,
                State::Refining(page, candidate, score) => self.refine(page, candidate, score),
                State::Accepted(page, bbox, score) => {
                    self.finish(page, bbox, Some(score), false, LoopOutcome::Accepted)
                        .await
                }
                State::Exhausted(converged) => self.exhaust(converged).await,
            };
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    async fn emit(&self, event: ExtractionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Init: render the next candidate page, or settle on the best box.
    async fn next_page(&mut self) -> State {
        let Some(page) = self.pages.next() else {
            if self.best.is_some() {
                return State::Exhausted(false);
            }
            info!(
                "{}: not found after {} page(s)",
                self.label, self.stats.pages_tried
            );
            return State::Done(LoopOutcome::NotFound);
        };

        self.stats.pages_tried += 1;
        self.emit(ExtractionEvent::PageTried {
            label: self.key.clone(),
            page,
        })
        .await;

        match self.render(page).await {
            Ok(rendered) => State::Locating(Arc::new(rendered)),
            Err(reason) => {
                warn!("{}: failed to render page {}: {}", self.label, page, reason);
                State::Done(LoopOutcome::RenderFailed { page, reason })
            }
        }
    }

    async fn render(&mut self, page: u32) -> Result<RenderedPage, String> {
        self.stats.renders += 1;
        let document = self.ctx.document.clone();
        let renderer = self.ctx.renderer.clone();
        let dpi = self.ctx.settings.dpi;
        tokio::task::spawn_blocking(move || renderer.render(document.as_ref(), page, dpi))
            .await
            .map_err(|e| format!("render task failed: {}", e))?
            .map_err(|e| e.to_string())
    }

    /// Locating: ask for a box on the current page.
    async fn locate(&mut self, page: Arc<RenderedPage>) -> State {
        self.stats.locate_calls += 1;
        let located = self
            .ctx
            .locator
            .locate(&page, &self.label, self.mode, self.stats.rounds)
            .await;

        match located {
            Ok(Some(bbox)) => State::Assessing(page, bbox),
            Ok(None) => State::Init,
            Err(e) => {
                warn!("{}: locate failed on page {}: {}", self.label, page.page, e);
                State::Init
            }
        }
    }

    /// Assessing: grade the candidate, spending one round.
    async fn assess(&mut self, page: Arc<RenderedPage>, candidate: BoundingBox) -> State {
        let settings = self.ctx.settings;
        if self.stats.rounds >= settings.max_rounds {
            return State::Exhausted(false);
        }

        self.stats.rounds += 1;
        let round = self.stats.rounds;
        let score = match self
            .ctx
            .assessor
            .assess(&page, &candidate, &self.label, round)
            .await
        {
            Ok(score) => score,
            Err(e) => {
                warn!("{}: assess round {} failed: {}", self.label, round, e);
                QualityScore::unscored(round, e.to_string())
            }
        };

        self.emit(ExtractionEvent::RoundAssessed {
            label: self.key.clone(),
            page: page.page,
            round,
            score: score.score,
        })
        .await;

        let improves = self
            .best
            .as_ref()
            .map_or(true, |best| score.value() >= best.score.value());
        if improves {
            self.best = Some(Best {
                page: page.clone(),
                bbox: candidate,
                score: score.clone(),
            });
        }

        if score.meets(settings.quality_threshold) {
            info!(
                "{}: accepted on page {} round {} (score {})",
                self.label,
                page.page,
                round,
                score.value()
            );
            return State::Accepted(page, candidate, score);
        }
        if round >= settings.max_rounds {
            return State::Exhausted(false);
        }
        State::Refining(page, candidate, score)
    }

    /// Refining: adopt the correction, or re-locate when none was offered.
    fn refine(
        &mut self,
        page: Arc<RenderedPage>,
        candidate: BoundingBox,
        score: QualityScore,
    ) -> State {
        match score.corrected {
            Some(corrected) => {
                let delta = corrected.delta(&candidate);
                if delta < self.ctx.settings.convergence_delta {
                    debug!(
                        "{}: correction moved {:.1} units, treating as converged",
                        self.label, delta
                    );
                    State::Exhausted(true)
                } else {
                    State::Assessing(page, corrected)
                }
            }
            None => State::Locating(page),
        }
    }

    async fn exhaust(&mut self, converged: bool) -> State {
        match self.best.take() {
            Some(Best { page, bbox, score }) => {
                info!(
                    "{}: keeping best box on page {} (score {:?}) after {} rounds",
                    self.label, page.page, score.score, self.stats.rounds
                );
                self.finish(page, bbox, Some(score), converged, LoopOutcome::Exhausted)
                    .await
            }
            None => State::Done(LoopOutcome::NotFound),
        }
    }

    /// Crop the chosen box from the original render.
    async fn finish(
        &mut self,
        page: Arc<RenderedPage>,
        bbox: BoundingBox,
        score: Option<QualityScore>,
        converged: bool,
        wrap: fn(FinalCrop) -> LoopOutcome,
    ) -> State {
        let padding = if self.label.is_subfigure() {
            SUBFIGURE_PADDING
        } else {
            DEFAULT_PADDING
        };
        let page_number = page.page;
        let cropped =
            tokio::task::spawn_blocking(move || crop(&page.image, &bbox, padding)).await;

        match cropped {
            Ok(Some(image)) => State::Done(wrap(FinalCrop {
                page: page_number,
                bbox,
                score,
                image,
                converged,
            })),
            Ok(None) => State::Done(LoopOutcome::RenderFailed {
                page: page_number,
                reason: format!("box {} covers no pixels", bbox),
            }),
            Err(e) => State::Done(LoopOutcome::RenderFailed {
                page: page_number,
                reason: format!("crop task failed: {}", e),
            }),
        }
    }
}
