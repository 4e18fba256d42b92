//! Page text index: one pass over a document's text, many label lookups.
//!
//! Every page's text is read exactly once at build time. Each figure/table
//! reference found is recorded against its base label (sub-figure tags are
//! folded into the parent), with caption lines counted separately from
//! body references so that the captioned page ranks first.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::document::Document;
use crate::label::{FigureLabel, LabelKey, LabelKind};

/// Pages with fewer non-whitespace characters than this count as image-only.
const MIN_TEXT_CHARS: usize = 20;

/// Column gap (in spaces) that marks the start of a caption mid-line in
/// `pdftotext -layout` output for multi-column papers.
const COLUMN_GAP: &str = "   ";

/// How one page references one label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHit {
    pub page: u32,
    /// Caption-style occurrences ("Figure 2: ...").
    pub caption_hits: u32,
    /// Every occurrence, captions included.
    pub mentions: u32,
    /// Line of the first occurrence on the page.
    pub first_line: usize,
}

/// Immutable per-document index from label to ranked candidate pages.
#[derive(Debug, Clone, Default)]
pub struct PageTextIndex {
    entries: HashMap<LabelKey, Vec<PageHit>>,
    page_count: u32,
    text_pages: u32,
    failed_pages: u32,
}

impl PageTextIndex {
    /// Scan every page of `doc` once.
    ///
    /// A page whose text cannot be read is treated as having no text layer.
    pub fn build(doc: &dyn Document) -> Self {
        let page_count = doc.page_count();
        let mut index = Self {
            page_count,
            ..Self::default()
        };

        for page in 1..=page_count {
            match doc.page_text(page) {
                Ok(text) => index.add_page(page, &text),
                Err(e) => {
                    warn!("Could not read text of page {}: {}", page, e);
                    index.failed_pages += 1;
                }
            }
        }
        index.finish();

        if index.needs_full_scan() {
            info!(
                "No text layer found in {} pages; labels will be searched page by page",
                page_count
            );
        } else {
            debug!(
                "Indexed {} labels across {} text pages",
                index.entries.len(),
                index.text_pages
            );
        }
        index
    }

    /// Build from already-extracted page texts (page numbers start at 1).
    pub fn from_texts<S: AsRef<str>>(texts: &[S]) -> Self {
        let mut index = Self {
            page_count: texts.len() as u32,
            ..Self::default()
        };
        for (i, text) in texts.iter().enumerate() {
            index.add_page(i as u32 + 1, text.as_ref());
        }
        index.finish();
        index
    }

    fn add_page(&mut self, page: u32, text: &str) {
        if text.chars().filter(|c| !c.is_whitespace()).count() >= MIN_TEXT_CHARS {
            self.text_pages += 1;
        }

        let mut hits: HashMap<LabelKey, PageHit> = HashMap::new();
        for (line_no, line) in text.lines().enumerate() {
            for caps in reference_regex().captures_iter(line) {
                let Some(key) = key_from_captures(&caps) else {
                    continue;
                };
                let Some(whole) = caps.get(0) else {
                    continue;
                };
                let caption = is_caption(line, whole.start(), whole.end());

                let hit = hits.entry(key).or_insert(PageHit {
                    page,
                    caption_hits: 0,
                    mentions: 0,
                    first_line: line_no,
                });
                hit.mentions += 1;
                if caption {
                    hit.caption_hits += 1;
                }
            }
        }

        for (key, hit) in hits {
            self.entries.entry(key).or_default().push(hit);
        }
    }

    fn finish(&mut self) {
        for hits in self.entries.values_mut() {
            hits.sort_by(|a, b| {
                b.caption_hits
                    .cmp(&a.caption_hits)
                    .then(b.mentions.cmp(&a.mentions))
                    .then(a.page.cmp(&b.page))
            });
        }
    }

    /// Ranked pages referencing the label's base figure/table.
    ///
    /// Sub-figures share their parent's pages.
    pub fn candidates(&self, label: &FigureLabel) -> Vec<u32> {
        self.hits(label).iter().map(|h| h.page).collect()
    }

    /// Ranked hits for the label's base figure/table.
    pub fn hits(&self, label: &FigureLabel) -> &[PageHit] {
        self.entries
            .get(&label.key())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// True when no page carries a usable text layer (scanned PDF).
    pub fn needs_full_scan(&self) -> bool {
        self.text_pages == 0
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Pages that had a usable text layer.
    pub fn text_pages(&self) -> u32 {
        self.text_pages
    }

    /// Pages whose text could not be extracted at all.
    pub fn failed_pages(&self) -> u32 {
        self.failed_pages
    }

    /// Number of distinct base labels seen.
    pub fn label_count(&self) -> usize {
        self.entries.len()
    }
}

/// Where a label's candidate pages came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    /// Ranked text matches.
    Indexed,
    /// Every page in order, because text gave nothing to go on.
    FullScan,
}

/// Ordered, single-use sequence of pages to try for one label.
#[derive(Debug)]
pub struct CandidatePages {
    pages: std::vec::IntoIter<u32>,
    total: usize,
    source: CandidateSource,
}

impl CandidatePages {
    pub fn new(pages: Vec<u32>, source: CandidateSource) -> Self {
        Self {
            total: pages.len(),
            pages: pages.into_iter(),
            source,
        }
    }

    /// Resolve candidates for `label`, limited to `window` (inclusive page range).
    ///
    /// Falls back to every page of the window in order when the index has
    /// nothing for the label and `full_scan_fallback` is set.
    pub fn resolve(
        index: &PageTextIndex,
        label: &FigureLabel,
        window: (u32, u32),
        full_scan_fallback: bool,
    ) -> Self {
        let (first, last) = window;
        let in_window = |p: &u32| *p >= first && *p <= last;

        let indexed: Vec<u32> = if index.needs_full_scan() {
            Vec::new()
        } else {
            index.candidates(label).into_iter().filter(in_window).collect()
        };

        if !indexed.is_empty() {
            return Self::new(indexed, CandidateSource::Indexed);
        }
        if full_scan_fallback {
            return Self::new((first..=last).collect(), CandidateSource::FullScan);
        }
        Self::new(Vec::new(), CandidateSource::Indexed)
    }

    pub fn source(&self) -> CandidateSource {
        self.source
    }

    /// Number of pages this sequence started with.
    pub fn total(&self) -> usize {
        self.total
    }
}

impl Iterator for CandidatePages {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        self.pages.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pages.size_hint()
    }
}

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(fig(?:ure)?s?\.?|tables?)\s*(\d+)(?:\s*\(\s*[a-z]\s*\)|[a-z]\b)?")
            .expect("reference regex is valid")
    })
}

fn key_from_captures(caps: &regex::Captures<'_>) -> Option<LabelKey> {
    let kind = if caps[1].to_ascii_lowercase().starts_with("fig") {
        LabelKind::Figure
    } else {
        LabelKind::Table
    };
    let number = caps[2].parse().ok()?;
    Some(LabelKey { kind, number })
}

/// A reference is a caption when it opens the line (or a layout column) and
/// is followed by caption punctuation or a capitalised title.
fn is_caption(line: &str, start: usize, end: usize) -> bool {
    let before = &line[..start];
    let opens_line = before.trim().is_empty() || before.ends_with(COLUMN_GAP);
    if !opens_line {
        return false;
    }

    let after = line[end..].trim_start();
    match after.chars().next() {
        None => true,
        Some(c) if matches!(c, ':' | '.' | '|' | '-' | '\u{2013}' | '\u{2014}') => true,
        Some(c) => c.is_uppercase() && line[end..].starts_with(char::is_whitespace),
    }
}
