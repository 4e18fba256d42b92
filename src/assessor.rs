//! Visual quality assessment of a candidate box.
//!
//! The candidate is drawn onto the full page as a red outline and the model
//! grades what it sees, optionally proposing a corrected box.

use std::sync::Arc;

use tracing::debug;

use crate::bbox::{draw_overlay, BoundingBox};
use crate::label::FigureLabel;
use crate::render::RenderedPage;
use crate::vision::{call_with_retry, AssessRequest, RetryPolicy, VisionError, VisionModel};

/// Grade for one candidate box.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityScore {
    /// 0-10; `None` when the model returned no usable score.
    pub score: Option<u8>,
    /// Box proposed by the model, normalized and stamped with `round`.
    pub corrected: Option<BoundingBox>,
    /// Assessment round (1-based) that produced this score.
    pub round: u32,
    pub issues: Vec<String>,
    pub caption_status: Option<String>,
}

impl QualityScore {
    /// Score used for comparisons; a missing score ranks lowest.
    pub fn value(&self) -> u8 {
        self.score.unwrap_or(0)
    }

    pub fn meets(&self, threshold: u8) -> bool {
        self.score.is_some_and(|s| s >= threshold)
    }

    /// Placeholder for a round whose model call failed outright.
    pub fn unscored(round: u32, issue: impl Into<String>) -> Self {
        Self {
            score: None,
            corrected: None,
            round,
            issues: vec![issue.into()],
            caption_status: None,
        }
    }
}

/// Scores candidate boxes by showing the model its own guess.
#[derive(Clone)]
pub struct QualityAssessor {
    model: Arc<dyn VisionModel>,
    retry: RetryPolicy,
}

impl QualityAssessor {
    pub fn new(model: Arc<dyn VisionModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    /// Assess `candidate` on `page` for `label`.
    pub async fn assess(
        &self,
        page: &RenderedPage,
        candidate: &BoundingBox,
        label: &FigureLabel,
        round: u32,
    ) -> Result<QualityScore, VisionError> {
        let overlay = draw_overlay(&page.image, candidate);
        let current = candidate.to_model_scale();
        let what = format!("assess {} round {}", label, round);

        let reply = call_with_retry(self.retry, &what, || {
            self.model.assess(AssessRequest {
                overlay: &overlay,
                label,
                mode: candidate.mode,
                current,
            })
        })
        .await?;

        let corrected = if reply.needs_refinement == Some(false) {
            None
        } else {
            reply.refined_bbox.and_then(|raw| {
                BoundingBox::from_model(raw, page.width(), page.height(), candidate.mode, round)
            })
        };

        debug!(
            "{} round {}: score {:?}, correction {}, issues {:?}",
            label,
            round,
            reply.quality_score,
            corrected.map(|b| b.to_string()).unwrap_or_else(|| "none".into()),
            reply.issues
        );

        Ok(QualityScore {
            score: reply.quality_score,
            corrected,
            round,
            issues: reply.issues,
            caption_status: reply.caption_status,
        })
    }
}
