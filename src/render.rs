//! Page rasterization.

use std::fmt;
use std::io::Cursor;
use std::process::Command;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ImageEncoder, ImageResult, RgbImage};
use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

use crate::document::{run_tool, Document, DocumentError};

/// Default rendering resolution.
pub const DEFAULT_DPI: u32 = 300;

/// Errors from rendering a page.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("Rasterizer failed on page {page}: {reason}")]
    Failed { page: u32, reason: String },

    #[error("Could not decode rendered page {page}: {reason}")]
    Decode { page: u32, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One rasterized page, owned by the refinement loop working on it.
#[derive(Clone)]
pub struct RenderedPage {
    pub page: u32,
    pub dpi: u32,
    pub image: RgbImage,
}

impl RenderedPage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl fmt::Debug for RenderedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedPage")
            .field("page", &self.page)
            .field("dpi", &self.dpi)
            .field("size", &(self.image.width(), self.image.height()))
            .finish()
    }
}

/// Turns a document page into pixels.
///
/// Implementations must be deterministic: the same `(document, page, dpi)`
/// yields identical pixels.
pub trait PageRenderer: Send + Sync {
    fn render(&self, doc: &dyn Document, page: u32, dpi: u32) -> Result<RenderedPage, RenderError>;
}

/// Renderer backed by Poppler's `pdftoppm`.
#[derive(Debug, Clone, Default)]
pub struct PdftoppmRenderer;

impl PdftoppmRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl PageRenderer for PdftoppmRenderer {
    fn render(&self, doc: &dyn Document, page: u32, dpi: u32) -> Result<RenderedPage, RenderError> {
        doc.check_page(page)?;

        let temp_dir = TempDir::new()?;
        let prefix = temp_dir.path().join("page");
        let page_str = page.to_string();
        let dpi_str = dpi.to_string();

        let output = run_tool(
            Command::new("pdftoppm")
                .args(["-png", "-singlefile", "-r", &dpi_str, "-f", &page_str, "-l", &page_str])
                .arg(doc.path())
                .arg(&prefix),
            "pdftoppm",
        )?;

        if !output.status.success() {
            return Err(RenderError::Failed {
                page,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let png_path = prefix.with_extension("png");
        let image = image::open(&png_path)
            .map_err(|e| RenderError::Decode {
                page,
                reason: e.to_string(),
            })?
            .to_rgb8();

        debug!(
            "Rendered page {} at {} DPI ({}x{})",
            page,
            dpi,
            image.width(),
            image.height()
        );
        Ok(RenderedPage { page, dpi, image })
    }
}

/// Encode an RGB image as PNG bytes.
pub fn encode_png(image: &RgbImage, compression: CompressionType) -> ImageResult<Vec<u8>> {
    let mut bytes = Vec::new();
    PngEncoder::new_with_quality(Cursor::new(&mut bytes), compression, FilterType::Adaptive)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgb8,
        )?;
    Ok(bytes)
}
