//! figcrop - extract labelled figures and tables from PDFs.
//!
//! A document's text layer is scanned once to find candidate pages for each
//! requested label ("Figure 2(a)", "Table 1 [content-only]"). Each label then
//! runs a bounded locate/assess refinement loop against a vision model, and
//! the accepted box is cropped from the original page render into a
//! canonically named PNG.

pub mod assessor;
pub mod bbox;
pub mod config;
pub mod document;
pub mod index;
pub mod label;
pub mod locator;
pub mod pipeline;
pub mod refine;
pub mod render;
pub mod vision;

pub use bbox::{BoundingBox, BoxMode};
pub use config::{Config, ConfigError, ExtractConfig, VisionConfig};
pub use document::{Document, DocumentError, PdfDocument};
pub use index::PageTextIndex;
pub use label::{FigureLabel, LabelError, LabelKind, LabelRequest};
pub use pipeline::{
    ExtractionEvent, ExtractionPipeline, ExtractionReport, ExtractionResult, ExtractionStatus,
    FailureReason, LabelJob, OutputSpec, PipelineError,
};
pub use render::{PageRenderer, PdftoppmRenderer, RenderError, RenderedPage};
pub use vision::{OpenAiVision, VisionError, VisionModel};
