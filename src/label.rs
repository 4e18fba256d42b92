//! Figure and table labels.
//!
//! Labels arrive verbatim from running text ("Figure 2(a)", "Fig. 3",
//! "Table 1 [content-only]") and are reduced to a canonical form that
//! drives both the page index lookup and the output filename.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::bbox::BoxMode;

/// Errors from label parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LabelError {
    #[error("Empty label")]
    Empty,

    #[error("Not a figure or table label: {0}")]
    Unrecognized(String),

    #[error("Unknown mode annotation: [{0}]")]
    UnknownAnnotation(String),
}

/// Whether a label names a figure or a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LabelKind {
    Figure,
    Table,
}

impl LabelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelKind::Figure => "Figure",
            LabelKind::Table => "Table",
        }
    }
}

impl fmt::Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base label without any sub-figure tag, used as the page index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelKey {
    pub kind: LabelKind,
    pub number: u32,
}

impl fmt::Display for LabelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.number)
    }
}

/// A canonical figure/table label, e.g. `Figure 2(a)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FigureLabel {
    pub kind: LabelKind,
    pub number: u32,
    /// Lowercase sub-figure tag (`a` in "Figure 2(a)").
    pub sub: Option<char>,
}

impl FigureLabel {
    pub fn new(kind: LabelKind, number: u32) -> Self {
        Self {
            kind,
            number,
            sub: None,
        }
    }

    pub fn with_sub(mut self, sub: char) -> Self {
        self.sub = Some(sub.to_ascii_lowercase());
        self
    }

    /// Parse a bare label (no mode annotation).
    pub fn parse(input: &str) -> Result<Self, LabelError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(LabelError::Empty);
        }

        let caps = label_regex()
            .captures(trimmed)
            .ok_or_else(|| LabelError::Unrecognized(trimmed.to_string()))?;

        let kind = if caps[1].to_ascii_lowercase().starts_with("fig") {
            LabelKind::Figure
        } else {
            LabelKind::Table
        };
        let number: u32 = caps[2]
            .parse()
            .map_err(|_| LabelError::Unrecognized(trimmed.to_string()))?;
        let sub = caps
            .get(3)
            .or_else(|| caps.get(4))
            .and_then(|m| m.as_str().chars().next())
            .map(|c| c.to_ascii_lowercase());

        Ok(Self { kind, number, sub })
    }

    pub fn key(&self) -> LabelKey {
        LabelKey {
            kind: self.kind,
            number: self.number,
        }
    }

    pub fn is_subfigure(&self) -> bool {
        self.sub.is_some()
    }

    /// The parent label of a sub-figure (or the label itself).
    pub fn base(&self) -> FigureLabel {
        FigureLabel {
            sub: None,
            ..*self
        }
    }

    /// Canonical output filename: `Figure_2.png`, `Figure_2(a).png`, `Table_1.png`.
    pub fn file_name(&self) -> String {
        match self.sub {
            Some(sub) => format!("{}_{}({}).png", self.kind, self.number, sub),
            None => format!("{}_{}.png", self.kind, self.number),
        }
    }
}

impl fmt::Display for FigureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.number)?;
        if let Some(sub) = self.sub {
            write!(f, "({})", sub)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for FigureLabel {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A label as requested by a caller, with any bracket mode annotation resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRequest {
    /// The label string exactly as supplied.
    pub raw: String,
    pub label: FigureLabel,
    /// Mode chosen by an inline annotation, if any.
    pub mode: Option<BoxMode>,
}

impl LabelRequest {
    /// Parse `Figure 3 [content-only]` style input.
    pub fn parse(input: &str) -> Result<Self, LabelError> {
        let mut mode = None;
        let mut stripped = input.to_string();

        if let Some(caps) = annotation_regex().captures(input) {
            let annotation = caps[1].trim().to_ascii_lowercase().replace(['_', ' '], "-");
            mode = Some(match annotation.as_str() {
                "content-only" | "no-extras" | "content" => BoxMode::ContentOnly,
                "complete" | "full" | "with-extras" => BoxMode::Complete,
                _ => return Err(LabelError::UnknownAnnotation(caps[1].to_string())),
            });
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            stripped.replace_range(whole, " ");
        }

        let label = FigureLabel::parse(&stripped)?;
        Ok(Self {
            raw: input.trim().to_string(),
            label,
            mode,
        })
    }

    /// Resolve the effective mode given the caller's default.
    pub fn mode_or(&self, default: BoxMode) -> BoxMode {
        self.mode.unwrap_or(default)
    }
}

/// Split a comma-separated batch argument into trimmed, non-empty labels.
pub fn split_batch(batch: &str) -> Vec<String> {
    batch
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(fig(?:ure)?s?\.?|tab(?:le)?s?\.?)\s*(\d+)\s*(?:[(\[]\s*([a-z])\s*[)\]]|([a-z]))?$",
        )
        .expect("label regex is valid")
    })
}

fn annotation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[\s*([A-Za-z][A-Za-z _-]{2,})\s*\]").expect("annotation regex is valid")
    })
}
