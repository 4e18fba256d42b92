//! End-to-end extraction tests with a fake document, renderer and vision model.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

use figcrop::vision::{AssessReply, AssessRequest, LocateReply, LocateRequest};
use figcrop::{
    BoxMode, Document, DocumentError, ExtractConfig, ExtractionEvent, ExtractionPipeline,
    ExtractionStatus, FailureReason, LabelJob, OutputSpec, PageRenderer, RenderError,
    RenderedPage, VisionError, VisionModel,
};

struct FakeDocument {
    path: PathBuf,
    pages: Vec<String>,
    text_reads: AtomicU32,
}

impl FakeDocument {
    fn new(pages: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            path: PathBuf::from("paper.pdf"),
            pages,
            text_reads: AtomicU32::new(0),
        })
    }

    /// `count` pages of filler text with captions placed on the given pages.
    fn with_captions(count: u32, captions: &[(u32, &str)]) -> Arc<Self> {
        let pages = (1..=count)
            .map(|page| {
                let mut text = format!("Section {}\nSome body text discussing results.\n", page);
                for (caption_page, caption) in captions {
                    if *caption_page == page {
                        text.push_str(caption);
                        text.push('\n');
                    }
                }
                text
            })
            .collect();
        Self::new(pages)
    }

    fn reads(&self) -> u32 {
        self.text_reads.load(Ordering::SeqCst)
    }
}

impl Document for FakeDocument {
    fn path(&self) -> &Path {
        &self.path
    }

    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_text(&self, page: u32) -> Result<String, DocumentError> {
        self.check_page(page)?;
        self.text_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.pages[(page - 1) as usize].clone())
    }
}

/// Renders a white page with the page number stamped into pixel (0, 0).
#[derive(Default)]
struct StampRenderer {
    renders: AtomicU32,
}

impl StampRenderer {
    fn renders(&self) -> u32 {
        self.renders.load(Ordering::SeqCst)
    }
}

impl PageRenderer for StampRenderer {
    fn render(&self, doc: &dyn Document, page: u32, dpi: u32) -> Result<RenderedPage, RenderError> {
        doc.check_page(page)?;
        self.renders.fetch_add(1, Ordering::SeqCst);
        let mut image = RgbImage::from_pixel(200, 100, Rgb([255, 255, 255]));
        image.put_pixel(0, 0, Rgb([page as u8, 0, 0]));
        Ok(RenderedPage { page, dpi, image })
    }
}

struct Target {
    page: u32,
    bbox: [f64; 4],
    /// Scores for successive assessments; the last one repeats.
    scores: Vec<u8>,
}

/// Scripted model: finds each target only on its page.
#[derive(Default)]
struct FakeVision {
    targets: HashMap<String, Target>,
    assessments: Mutex<HashMap<String, u32>>,
    locates: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    /// Box mode of every request, by label.
    modes: Mutex<Vec<(String, BoxMode)>>,
}

impl FakeVision {
    fn target(mut self, label: &str, page: u32, scores: &[u8]) -> Self {
        self.targets.insert(
            label.to_string(),
            Target {
                page,
                bbox: [100.0, 100.0, 500.0, 500.0],
                scores: scores.to_vec(),
            },
        );
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn assessments_for(&self, label: &str) -> u32 {
        self.assessments
            .lock()
            .unwrap()
            .get(label)
            .copied()
            .unwrap_or(0)
    }

    fn modes_for(&self, label: &str) -> Vec<BoxMode> {
        self.modes
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| l == label)
            .map(|(_, mode)| *mode)
            .collect()
    }

    fn total_assessments(&self) -> u32 {
        self.assessments.lock().unwrap().values().sum()
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VisionModel for FakeVision {
    fn model_name(&self) -> &str {
        "fake-vl"
    }

    async fn locate(&self, request: LocateRequest<'_>) -> Result<LocateReply, VisionError> {
        self.enter().await;
        self.locates.fetch_add(1, Ordering::SeqCst);
        self.modes
            .lock()
            .unwrap()
            .push((request.label.to_string(), request.mode));
        let page = u32::from(request.image.get_pixel(0, 0)[0]);
        let reply = match self.targets.get(&request.label.to_string()) {
            Some(target) if target.page == page => LocateReply::found(target.bbox),
            _ => LocateReply::not_found(),
        };
        self.leave();
        Ok(reply)
    }

    async fn assess(&self, request: AssessRequest<'_>) -> Result<AssessReply, VisionError> {
        self.enter().await;
        let key = request.label.to_string();
        self.modes.lock().unwrap().push((key.clone(), request.mode));
        let n = {
            let mut assessments = self.assessments.lock().unwrap();
            let n = assessments.entry(key.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let reply = match self.targets.get(&key) {
            Some(target) => {
                let idx = (n as usize - 1).min(target.scores.len().saturating_sub(1));
                let score = target.scores.get(idx).copied().unwrap_or(0);
                let mut reply = AssessReply::scored(score);
                if score < 8 {
                    // Grow the box enough that it never looks converged.
                    let grow = 40.0 * f64::from(n);
                    let [x1, y1, x2, y2] = request.current;
                    reply = reply.with_refinement([x1, y1, (x2 + grow).min(1000.0), (y2 + grow).min(1000.0)]);
                }
                reply
            }
            None => AssessReply::default(),
        };
        self.leave();
        Ok(reply)
    }
}

fn config() -> ExtractConfig {
    ExtractConfig {
        retry_base_ms: 1,
        ..ExtractConfig::default()
    }
}

fn pipeline(
    doc: &Arc<FakeDocument>,
    renderer: &Arc<StampRenderer>,
    vision: &Arc<FakeVision>,
    config: ExtractConfig,
) -> ExtractionPipeline {
    ExtractionPipeline::new(doc.clone(), renderer.clone(), vision.clone(), config)
}

fn jobs(labels: &[&str]) -> Vec<LabelJob> {
    labels.iter().map(|l| LabelJob::new(*l)).collect()
}

fn twenty_page_paper() -> Arc<FakeDocument> {
    FakeDocument::with_captions(
        20,
        &[
            (2, "Figure 1: System overview."),
            (5, "Figure 2: Attention weights per layer."),
            (9, "Table 1: Results on the benchmark."),
            (12, "As Figure 2 shows, the weights are sparse."),
            (13, "Figure 3: Ablation study."),
            (17, "Figure 4: Training curves."),
        ],
    )
}

#[tokio::test]
async fn test_batch_scans_text_once_and_bounds_model_work() {
    let doc = twenty_page_paper();
    let renderer = Arc::new(StampRenderer::default());
    let vision = Arc::new(
        FakeVision::default()
            .target("Figure 1", 2, &[9])
            .target("Figure 2", 5, &[5, 9])
            .target("Table 1", 9, &[3, 4, 6])
            .target("Figure 3", 13, &[10])
            .target("Figure 4", 17, &[2]),
    );
    let temp = TempDir::new().unwrap();

    let report = pipeline(&doc, &renderer, &vision, config())
        .extract(
            jobs(&["Figure 1", "Figure 2", "Table 1", "Figure 3", "Figure 4"]),
            &OutputSpec::Directory(temp.path().to_path_buf()),
        )
        .await
        .unwrap();

    assert_eq!(doc.reads(), 20);
    assert!(vision.total_assessments() <= 15);
    assert!(renderer.renders() < 100);
    // Every label was found on its captioned page on the first try.
    assert_eq!(renderer.renders(), 5);
    assert!(report.all_saved());
    assert!(!report.full_scan);

    let fig2 = report.get("Figure 2").unwrap();
    assert_eq!(fig2.status, ExtractionStatus::Success);
    assert_eq!(fig2.page, Some(5));
    assert_eq!(fig2.stats.rounds, 2);

    let table = report.get("Table 1").unwrap();
    assert_eq!(table.status, ExtractionStatus::LowQualityAccepted);
    assert_eq!(table.stats.rounds, 3);
    assert_eq!(table.score, Some(6));

    for name in ["Figure_1.png", "Figure_2.png", "Table_1.png", "Figure_3.png", "Figure_4.png"] {
        assert!(temp.path().join(name).is_file(), "missing {}", name);
    }
}

#[tokio::test]
async fn test_high_score_stops_on_first_round() {
    let doc = twenty_page_paper();
    let renderer = Arc::new(StampRenderer::default());
    let vision = Arc::new(FakeVision::default().target("Figure 3", 13, &[8, 10]));
    let temp = TempDir::new().unwrap();

    let report = pipeline(&doc, &renderer, &vision, config())
        .extract(jobs(&["Figure 3"]), &OutputSpec::Directory(temp.path().into()))
        .await
        .unwrap();

    let result = report.get("Figure 3").unwrap();
    assert_eq!(result.status, ExtractionStatus::Success);
    assert_eq!(result.score, Some(8));
    assert_eq!(vision.assessments_for("Figure 3"), 1);
}

#[tokio::test]
async fn test_missing_label_fails_without_stopping_batch() {
    let doc = twenty_page_paper();
    let renderer = Arc::new(StampRenderer::default());
    let vision = Arc::new(FakeVision::default().target("Figure 1", 2, &[9]));
    let temp = TempDir::new().unwrap();

    let report = pipeline(&doc, &renderer, &vision, config())
        .extract(
            jobs(&["Table 2", "Figure 1"]),
            &OutputSpec::Directory(temp.path().into()),
        )
        .await
        .unwrap();

    let missing = report.get("Table 2").unwrap();
    assert_eq!(missing.status, ExtractionStatus::Failed);
    assert_eq!(missing.reason, Some(FailureReason::NotFound));
    assert_eq!(missing.stats.rounds, 0);
    // No text match, so every page was tried in order.
    assert_eq!(missing.stats.pages_tried, 20);
    assert!(!temp.path().join("Table_2.png").exists());

    assert_eq!(report.get("Figure 1").unwrap().status, ExtractionStatus::Success);
    assert!(temp.path().join("Figure_1.png").is_file());
    assert!(!report.all_saved());
    assert_eq!(report.needs_attention().count(), 1);
}

#[tokio::test]
async fn test_round_budget_holds_across_labels() {
    let doc = twenty_page_paper();
    let renderer = Arc::new(StampRenderer::default());
    let vision = Arc::new(
        FakeVision::default()
            .target("Figure 1", 2, &[1])
            .target("Figure 4", 17, &[2]),
    );
    let temp = TempDir::new().unwrap();
    let config = ExtractConfig {
        max_rounds: 2,
        ..config()
    };

    let report = pipeline(&doc, &renderer, &vision, config)
        .extract(
            jobs(&["Figure 1", "Figure 4"]),
            &OutputSpec::Directory(temp.path().into()),
        )
        .await
        .unwrap();

    for label in ["Figure 1", "Figure 4"] {
        let result = report.get(label).unwrap();
        assert_eq!(result.status, ExtractionStatus::LowQualityAccepted);
        assert_eq!(result.stats.rounds, 2);
        assert_eq!(vision.assessments_for(label), 2);
    }
    assert!(report.all_saved());
}

#[tokio::test]
async fn test_subfigure_uses_parent_pages_and_canonical_name() {
    let doc = twenty_page_paper();
    let renderer = Arc::new(StampRenderer::default());
    let vision = Arc::new(FakeVision::default().target("Figure 2(a)", 5, &[9]));
    let temp = TempDir::new().unwrap();

    let report = pipeline(&doc, &renderer, &vision, config())
        .extract(jobs(&["fig. 2a"]), &OutputSpec::Directory(temp.path().into()))
        .await
        .unwrap();

    let result = report.get("fig. 2a").unwrap();
    assert_eq!(result.page, Some(5));
    assert_eq!(result.stats.pages_tried, 1);
    assert_eq!(
        result.output_path.as_deref(),
        Some(temp.path().join("Figure_2(a).png").as_path())
    );
}

#[tokio::test]
async fn test_duplicates_and_invalid_labels_are_skipped() {
    let doc = twenty_page_paper();
    let renderer = Arc::new(StampRenderer::default());
    let vision = Arc::new(FakeVision::default().target("Figure 1", 2, &[9]));
    let temp = TempDir::new().unwrap();

    let report = pipeline(&doc, &renderer, &vision, config())
        .extract(
            jobs(&["Figure 1", "Fig. 1", "Figure 1 [content-only]", "Chart 3"]),
            &OutputSpec::Directory(temp.path().join("content")),
        )
        .await
        .unwrap();

    assert_eq!(report.results.len(), 4);
    assert_eq!(report.get("Figure 1").unwrap().status, ExtractionStatus::Success);

    let dup = report.get("Fig. 1").unwrap();
    assert_eq!(dup.status, ExtractionStatus::Skipped);
    assert_eq!(dup.reason, Some(FailureReason::Duplicate));

    // Same canonical file as "Figure 1", so the later request is dropped.
    let content = report.get("Figure 1 [content-only]").unwrap();
    assert_eq!(content.mode, BoxMode::ContentOnly);
    assert_eq!(content.status, ExtractionStatus::Skipped);
    assert_eq!(content.reason, Some(FailureReason::Duplicate));
    assert_eq!(vision.assessments_for("Figure 1"), 1);

    let invalid = report.get("Chart 3").unwrap();
    assert_eq!(invalid.status, ExtractionStatus::Skipped);
    assert!(matches!(invalid.reason, Some(FailureReason::InvalidLabel(_))));

    // Only the invalid label needs a person to look at it.
    let attention: Vec<_> = report.needs_attention().map(|r| r.label.as_str()).collect();
    assert_eq!(attention, vec!["Chart 3"]);
    assert!(!report.all_saved());

    // Results keep request order.
    let order: Vec<_> = report.results.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(order, vec!["Figure 1", "Fig. 1", "Figure 1 [content-only]", "Chart 3"]);
}

#[tokio::test]
async fn test_rerun_produces_same_filenames() {
    let doc = twenty_page_paper();
    let renderer = Arc::new(StampRenderer::default());
    let vision = Arc::new(
        FakeVision::default()
            .target("Figure 1", 2, &[9])
            .target("Table 1", 9, &[9]),
    );
    let temp = TempDir::new().unwrap();
    let out = OutputSpec::Directory(temp.path().into());

    let first = pipeline(&doc, &renderer, &vision, config())
        .extract(jobs(&["Figure 1", "table 1"]), &out)
        .await
        .unwrap();
    let second = pipeline(&doc, &renderer, &vision, config())
        .extract(jobs(&["Figure 1", "table 1"]), &out)
        .await
        .unwrap();

    let paths = |r: &figcrop::ExtractionReport| -> Vec<PathBuf> {
        r.results.iter().filter_map(|x| x.output_path.clone()).collect()
    };
    assert_eq!(paths(&first), paths(&second));
    assert_eq!(
        paths(&first),
        vec![temp.path().join("Figure_1.png"), temp.path().join("Table_1.png")]
    );
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 2);
}

#[tokio::test]
async fn test_document_without_text_scans_pages_in_order() {
    let doc = FakeDocument::new(vec![String::new(); 6]);
    let renderer = Arc::new(StampRenderer::default());
    let vision = Arc::new(FakeVision::default().target("Figure 1", 4, &[9]));
    let temp = TempDir::new().unwrap();

    let report = pipeline(&doc, &renderer, &vision, config())
        .extract(jobs(&["Figure 1"]), &OutputSpec::Directory(temp.path().into()))
        .await
        .unwrap();

    assert!(report.full_scan);
    let result = report.get("Figure 1").unwrap();
    assert_eq!(result.status, ExtractionStatus::Success);
    assert_eq!(result.page, Some(4));
    assert_eq!(result.stats.pages_tried, 4);
    assert_eq!(result.stats.rounds, 1);
}

#[tokio::test]
async fn test_page_window_limits_search() {
    let doc = FakeDocument::new(vec![String::new(); 10]);
    let renderer = Arc::new(StampRenderer::default());
    let vision = Arc::new(FakeVision::default().target("Figure 1", 8, &[9]));
    let temp = TempDir::new().unwrap();
    let config = ExtractConfig {
        start_page: 3,
        max_pages: Some(4),
        ..config()
    };

    let report = pipeline(&doc, &renderer, &vision, config)
        .extract(jobs(&["Figure 1"]), &OutputSpec::Directory(temp.path().into()))
        .await
        .unwrap();

    let result = report.get("Figure 1").unwrap();
    assert_eq!(result.reason, Some(FailureReason::NotFound));
    assert_eq!(result.stats.pages_tried, 4);
    assert_eq!(renderer.renders(), 4);
}

#[tokio::test]
async fn test_cancelled_batch_reports_every_label() {
    let doc = twenty_page_paper();
    let renderer = Arc::new(StampRenderer::default());
    let vision = Arc::new(
        FakeVision::default()
            .target("Figure 1", 2, &[9])
            .target("Figure 2", 5, &[9]),
    );
    let temp = TempDir::new().unwrap();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    cancel_tx.send(true).unwrap();

    let report = pipeline(&doc, &renderer, &vision, config())
        .with_cancel(cancel_rx)
        .extract(
            jobs(&["Figure 1", "Figure 2"]),
            &OutputSpec::Directory(temp.path().into()),
        )
        .await
        .unwrap();

    assert_eq!(report.results.len(), 2);
    for result in &report.results {
        assert_eq!(result.status, ExtractionStatus::Failed);
        assert_eq!(result.reason, Some(FailureReason::Cancelled));
    }
    assert_eq!(renderer.renders(), 0);
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_model_calls_respect_worker_limit() {
    let doc = FakeDocument::with_captions(
        6,
        &[
            (1, "Figure 1: One."),
            (2, "Figure 2: Two."),
            (3, "Figure 3: Three."),
            (4, "Figure 4: Four."),
            (5, "Figure 5: Five."),
            (6, "Figure 6: Six."),
        ],
    );
    let renderer = Arc::new(StampRenderer::default());
    let mut fake = FakeVision::default().slow(Duration::from_millis(10));
    for n in 1..=6u32 {
        fake = fake.target(&format!("Figure {}", n), n, &[5, 9]);
    }
    let vision = Arc::new(fake);
    let temp = TempDir::new().unwrap();
    let config = ExtractConfig {
        max_concurrent_calls: 2,
        ..config()
    };

    let report = pipeline(&doc, &renderer, &vision, config)
        .extract(
            jobs(&["Figure 1", "Figure 2", "Figure 3", "Figure 4", "Figure 5", "Figure 6"]),
            &OutputSpec::Directory(temp.path().into()),
        )
        .await
        .unwrap();

    assert!(report.all_saved());
    assert!(vision.max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(vision.locates.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_events_describe_the_run() {
    let doc = twenty_page_paper();
    let renderer = Arc::new(StampRenderer::default());
    let vision = Arc::new(FakeVision::default().target("Figure 1", 2, &[4, 9]));
    let temp = TempDir::new().unwrap();
    let (tx, mut rx) = mpsc::channel(256);

    let report = pipeline(&doc, &renderer, &vision, config())
        .with_events(tx)
        .extract(
            jobs(&["Figure 1", "Nonsense"]),
            &OutputSpec::Directory(temp.path().into()),
        )
        .await
        .unwrap();
    assert_eq!(report.results.len(), 2);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    let built = events
        .iter()
        .filter(|e| matches!(e, ExtractionEvent::IndexBuilt { .. }))
        .count();
    assert_eq!(built, 1);
    assert!(matches!(events[0], ExtractionEvent::IndexBuilt { page_count: 20, .. }));

    let rounds: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ExtractionEvent::RoundAssessed { round, score, .. } => Some((*round, *score)),
            _ => None,
        })
        .collect();
    assert_eq!(rounds, vec![(1, Some(4)), (2, Some(9))]);

    let finished = events
        .iter()
        .filter(|e| matches!(e, ExtractionEvent::LabelFinished { .. }))
        .count();
    assert_eq!(finished, 2);
}

#[tokio::test]
async fn test_single_file_output() {
    let doc = twenty_page_paper();
    let renderer = Arc::new(StampRenderer::default());
    let vision = Arc::new(FakeVision::default().target("Figure 3", 13, &[9]));
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("slides").join("ablation.png");

    let report = pipeline(&doc, &renderer, &vision, config())
        .extract(jobs(&["Figure 3"]), &OutputSpec::File(path.clone()))
        .await
        .unwrap();
    assert_eq!(report.get("Figure 3").unwrap().output_path, Some(path.clone()));
    assert!(path.is_file());

    let err = pipeline(&doc, &renderer, &vision, config())
        .extract(jobs(&["Figure 1", "Figure 3"]), &OutputSpec::File(path))
        .await;
    assert!(err.is_err());
}

#[tokio::test]
async fn test_cancel_mid_run_stops_at_round_boundary() {
    let doc = twenty_page_paper();
    let renderer = Arc::new(StampRenderer::default());
    let vision = Arc::new(
        FakeVision::default()
            .target("Table 1", 9, &[3])
            .slow(Duration::from_millis(20)),
    );
    let temp = TempDir::new().unwrap();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (tx, mut rx) = mpsc::channel(64);

    let pipeline = pipeline(&doc, &renderer, &vision, config())
        .with_events(tx)
        .with_cancel(cancel_rx);
    let out = OutputSpec::Directory(temp.path().into());
    let cancel_after_first_round = async move {
        while let Some(event) = rx.recv().await {
            if matches!(event, ExtractionEvent::RoundAssessed { round: 1, .. }) {
                cancel_tx.send(true).unwrap();
                break;
            }
        }
    };
    let (report, ()) = tokio::join!(
        pipeline.extract(jobs(&["Table 1"]), &out),
        cancel_after_first_round
    );
    let report = report.unwrap();

    let result = report.get("Table 1").unwrap();
    assert_eq!(result.status, ExtractionStatus::Failed);
    assert_eq!(result.reason, Some(FailureReason::Cancelled));
    assert!(result.stats.rounds >= 1);
    assert!(result.stats.rounds < 3);
    assert!(!temp.path().join("Table_1.png").exists());
}

#[tokio::test]
async fn test_label_mode_reaches_the_model() {
    let doc = twenty_page_paper();
    let renderer = Arc::new(StampRenderer::default());
    let vision = Arc::new(
        FakeVision::default()
            .target("Table 1", 9, &[4, 9])
            .target("Figure 1", 2, &[9]),
    );
    let temp = TempDir::new().unwrap();

    let report = pipeline(&doc, &renderer, &vision, config())
        .extract(
            jobs(&["Table 1 [content-only]", "Figure 1"]),
            &OutputSpec::Directory(temp.path().into()),
        )
        .await
        .unwrap();
    assert!(report.all_saved());
    assert_eq!(
        report.get("Table 1 [content-only]").unwrap().mode,
        BoxMode::ContentOnly
    );

    // One locate plus two assessments.
    assert_eq!(vision.modes_for("Table 1"), vec![BoxMode::ContentOnly; 3]);
    assert_eq!(vision.modes_for("Figure 1"), vec![BoxMode::Complete; 2]);
}

#[tokio::test]
async fn test_no_extras_default_reaches_the_model() {
    let doc = twenty_page_paper();
    let renderer = Arc::new(StampRenderer::default());
    let vision = Arc::new(
        FakeVision::default()
            .target("Figure 1", 2, &[9])
            .target("Figure 3", 13, &[9]),
    );
    let temp = TempDir::new().unwrap();
    let config = ExtractConfig {
        include_extras: false,
        ..config()
    };

    let report = pipeline(&doc, &renderer, &vision, config)
        .extract(
            jobs(&["Figure 1", "Figure 3 [complete]"]),
            &OutputSpec::Directory(temp.path().into()),
        )
        .await
        .unwrap();
    assert!(report.all_saved());

    assert_eq!(vision.modes_for("Figure 1"), vec![BoxMode::ContentOnly; 2]);
    // An explicit annotation wins over the configured default.
    assert_eq!(vision.modes_for("Figure 3"), vec![BoxMode::Complete; 2]);
}

#[tokio::test]
async fn test_fast_label_finishes_before_slow_one() {
    let doc = twenty_page_paper();
    let renderer = Arc::new(StampRenderer::default());
    let vision = Arc::new(
        FakeVision::default()
            .target("Figure 1", 2, &[3])
            .target("Figure 2", 5, &[9])
            .slow(Duration::from_millis(10)),
    );
    let temp = TempDir::new().unwrap();
    let (tx, mut rx) = mpsc::channel(256);

    let report = pipeline(&doc, &renderer, &vision, config())
        .with_events(tx)
        .extract(
            jobs(&["Figure 1", "Figure 2"]),
            &OutputSpec::Directory(temp.path().into()),
        )
        .await
        .unwrap();
    assert!(report.all_saved());

    let mut finished = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ExtractionEvent::LabelFinished { label, .. } = event {
            finished.push(label);
        }
    }
    assert_eq!(finished, vec!["Figure 2", "Figure 1"]);
}
