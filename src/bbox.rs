//! Bounding boxes in normalized page space, plus the image operations
//! that consume them (overlay drawing and final cropping).

use std::fmt;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

/// Scale used when exchanging coordinates with the vision model.
pub const MODEL_SCALE: f64 = 1000.0;

/// Padding applied around a final crop, as a fraction of page size.
pub const DEFAULT_PADDING: f64 = 0.01;

/// Tighter padding for sub-figures, which sit next to sibling panels.
pub const SUBFIGURE_PADDING: f64 = 0.005;

/// Overlay outline thickness in pixels.
const OVERLAY_THICKNESS: u32 = 3;

/// What a bounding box is meant to cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoxMode {
    /// Figure body plus caption, legend, and notes.
    #[default]
    Complete,
    /// Figure body only.
    ContentOnly,
}

impl BoxMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoxMode::Complete => "complete",
            BoxMode::ContentOnly => "content-only",
        }
    }

    /// Mode implied by the `--no-extras` switch.
    pub fn from_include_extras(include_extras: bool) -> Self {
        if include_extras {
            BoxMode::Complete
        } else {
            BoxMode::ContentOnly
        }
    }
}

impl fmt::Display for BoxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A box in normalized `[0, 1]` page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub mode: BoxMode,
    /// Refinement round that produced this box (0 = initial locate).
    pub round: u32,
}

impl BoundingBox {
    /// Build a box from raw model output.
    ///
    /// Accepts 0-1000 units, 0-1 fractions, or pixel coordinates (any value
    /// above 1000), swaps reversed corners, clamps to the page, and returns
    /// `None` for degenerate or non-finite boxes.
    pub fn from_model(
        raw: [f64; 4],
        page_width: u32,
        page_height: u32,
        mode: BoxMode,
        round: u32,
    ) -> Option<Self> {
        if raw.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let max = raw.iter().cloned().fold(f64::MIN, f64::max);
        let [mut x1, mut y1, mut x2, mut y2] = if max <= 1.0 {
            raw
        } else if max <= MODEL_SCALE {
            raw.map(|v| v / MODEL_SCALE)
        } else {
            let (w, h) = (f64::from(page_width.max(1)), f64::from(page_height.max(1)));
            [raw[0] / w, raw[1] / h, raw[2] / w, raw[3] / h]
        };

        if x1 > x2 {
            std::mem::swap(&mut x1, &mut x2);
        }
        if y1 > y2 {
            std::mem::swap(&mut y1, &mut y2);
        }

        let bbox = Self {
            x1: x1.clamp(0.0, 1.0),
            y1: y1.clamp(0.0, 1.0),
            x2: x2.clamp(0.0, 1.0),
            y2: y2.clamp(0.0, 1.0),
            mode,
            round,
        };

        if bbox.width() <= f64::EPSILON || bbox.height() <= f64::EPSILON {
            return None;
        }
        Some(bbox)
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// Coordinates in model units, rounded to whole numbers.
    pub fn to_model_scale(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2].map(|v| (v * MODEL_SCALE).round())
    }

    /// Largest edge movement between two boxes, in model units.
    pub fn delta(&self, other: &BoundingBox) -> f64 {
        [
            self.x1 - other.x1,
            self.y1 - other.y1,
            self.x2 - other.x2,
            self.y2 - other.y2,
        ]
        .iter()
        .map(|d| d.abs() * MODEL_SCALE)
        .fold(0.0, f64::max)
    }

    /// Expand by `padding` on every side, clamped to the page.
    pub fn padded(&self, padding: f64) -> Self {
        Self {
            x1: (self.x1 - padding).max(0.0),
            y1: (self.y1 - padding).max(0.0),
            x2: (self.x2 + padding).min(1.0),
            y2: (self.y2 + padding).min(1.0),
            ..*self
        }
    }

    /// Pixel rectangle `(left, top, width, height)` on an image of the given size.
    pub fn pixel_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        // Nudge by a hair so float noise never adds or drops a pixel row.
        const EPS: f64 = 1e-6;
        let (w, h) = (f64::from(width), f64::from(height));
        let left = (self.x1 * w + EPS).floor().max(0.0) as u32;
        let top = (self.y1 * h + EPS).floor().max(0.0) as u32;
        let right = ((self.x2 * w - EPS).ceil().max(0.0) as u32).min(width);
        let bottom = ((self.y2 * h - EPS).ceil().max(0.0) as u32).min(height);

        if right <= left || bottom <= top {
            return None;
        }
        Some((left, top, right - left, bottom - top))
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x1, y1, x2, y2] = self.to_model_scale();
        write!(f, "[{}, {}, {}, {}]", x1, y1, x2, y2)
    }
}

/// Copy of `page` with `bbox` outlined in red.
pub fn draw_overlay(page: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    let mut overlay = page.clone();
    let Some((left, top, width, height)) = bbox.pixel_rect(page.width(), page.height()) else {
        return overlay;
    };

    let red = Rgb([255u8, 0, 0]);
    for t in 0..OVERLAY_THICKNESS {
        let inner_w = width.saturating_sub(2 * t);
        let inner_h = height.saturating_sub(2 * t);
        if inner_w == 0 || inner_h == 0 {
            break;
        }
        let rect = Rect::at((left + t) as i32, (top + t) as i32).of_size(inner_w, inner_h);
        draw_hollow_rect_mut(&mut overlay, rect, red);
    }
    overlay
}

/// Crop `page` to `bbox` with symmetric padding.
///
/// Returns `None` when the padded box covers no pixels.
pub fn crop(page: &RgbImage, bbox: &BoundingBox, padding: f64) -> Option<RgbImage> {
    let (left, top, width, height) = bbox
        .padded(padding)
        .pixel_rect(page.width(), page.height())?;
    Some(image::imageops::crop_imm(page, left, top, width, height).to_image())
}
