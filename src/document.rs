//! PDF documents backed by Poppler's command-line tools.
//!
//! Page count comes from `pdfinfo`, per-page text from `pdftotext`. Pages are
//! numbered from 1 everywhere in this crate, matching Poppler.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// Errors from opening or reading a document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("PDF file not found: {0}")]
    NotFound(PathBuf),

    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("Unreadable PDF {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    #[error("Text extraction failed: {0}")]
    TextFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read-only view of a loaded document.
pub trait Document: Send + Sync {
    /// Location of the underlying file, for tools that read it directly.
    fn path(&self) -> &Path;

    /// Number of pages.
    fn page_count(&self) -> u32;

    /// Extractable text of one page (1-based). Empty for image-only pages.
    fn page_text(&self, page: u32) -> Result<String, DocumentError>;

    /// Fail with `PageOutOfRange` unless `page` is in `1..=page_count`.
    fn check_page(&self, page: u32) -> Result<(), DocumentError> {
        let page_count = self.page_count();
        if page == 0 || page > page_count {
            return Err(DocumentError::PageOutOfRange { page, page_count });
        }
        Ok(())
    }
}

/// A PDF on disk.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    path: PathBuf,
    page_count: u32,
}

impl PdfDocument {
    /// Open a PDF and read its page count.
    ///
    /// This is the only fatal step of an extraction run: a missing or
    /// corrupt file stops everything.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(DocumentError::NotFound(path));
        }

        let output = run_tool(Command::new("pdfinfo").arg(&path), "pdfinfo")?;
        if !output.status.success() {
            return Err(DocumentError::Unreadable {
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                path,
            });
        }

        let page_count = parse_page_count(&String::from_utf8_lossy(&output.stdout))
            .filter(|n| *n > 0)
            .ok_or_else(|| DocumentError::Unreadable {
                path: path.clone(),
                reason: "pdfinfo reported no pages".to_string(),
            })?;

        debug!("Opened {} ({} pages)", path.display(), page_count);
        Ok(Self { path, page_count })
    }

    /// File stem, used in log lines.
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string())
    }
}

impl Document for PdfDocument {
    fn path(&self) -> &Path {
        &self.path
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_text(&self, page: u32) -> Result<String, DocumentError> {
        self.check_page(page)?;
        let page_str = page.to_string();
        let output = run_tool(
            Command::new("pdftotext")
                .args(["-layout", "-enc", "UTF-8", "-f", &page_str, "-l", &page_str])
                .arg(&self.path)
                .arg("-"),
            "pdftotext",
        )?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(DocumentError::TextFailed(format!(
                "pdftotext failed on page {}: {}",
                page,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Run a Poppler tool, mapping a missing binary to `ToolNotFound`.
pub(crate) fn run_tool(
    command: &mut Command,
    tool_name: &str,
) -> Result<std::process::Output, DocumentError> {
    command.output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DocumentError::ToolNotFound(format!("{} (install poppler-utils)", tool_name))
        } else {
            DocumentError::Io(e)
        }
    })
}

fn parse_page_count(pdfinfo_stdout: &str) -> Option<u32> {
    pdfinfo_stdout
        .lines()
        .find(|line| line.starts_with("Pages:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse().ok())
}
