//! Initial bounding-box location.

use std::sync::Arc;

use tracing::debug;

use crate::bbox::{BoundingBox, BoxMode};
use crate::label::FigureLabel;
use crate::render::RenderedPage;
use crate::vision::{call_with_retry, LocateRequest, RetryPolicy, VisionError, VisionModel};

/// Asks a vision model where a label sits on a rendered page.
#[derive(Clone)]
pub struct BoundingBoxLocator {
    model: Arc<dyn VisionModel>,
    retry: RetryPolicy,
}

impl BoundingBoxLocator {
    pub fn new(model: Arc<dyn VisionModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    /// Locate `label` on `page`.
    ///
    /// `Ok(None)` means the model did not find the label, or answered with a
    /// box that covers nothing. `round` is stamped on the returned box.
    pub async fn locate(
        &self,
        page: &RenderedPage,
        label: &FigureLabel,
        mode: BoxMode,
        round: u32,
    ) -> Result<Option<BoundingBox>, VisionError> {
        let what = format!("locate {} on page {}", label, page.page);
        let reply = call_with_retry(self.retry, &what, || {
            self.model.locate(LocateRequest {
                image: &page.image,
                label,
                mode,
            })
        })
        .await?;

        if !reply.found {
            debug!("{} not found on page {}", label, page.page);
            return Ok(None);
        }

        let bbox = reply
            .bbox
            .and_then(|raw| BoundingBox::from_model(raw, page.width(), page.height(), mode, round));
        match &bbox {
            Some(b) => debug!("{} located on page {} at {}", label, page.page, b),
            None => debug!(
                "{} reported on page {} with unusable box {:?}",
                label, page.page, reply.bbox
            ),
        }
        Ok(bbox)
    }
}
