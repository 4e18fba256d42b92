//! Parsing of free-form model replies into typed answers.
//!
//! Vision models wrap their JSON in reasoning blocks and markdown fences,
//! emit numbers as strings, and occasionally drop fields. Parsing here is
//! deliberately lenient: anything usable is kept, anything else becomes
//! `None` and the caller decides what a missing value means.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::VisionError;

/// Answer to a locate question.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocateReply {
    pub found: bool,
    /// Raw box as reported by the model, before normalization.
    pub bbox: Option<[f64; 4]>,
}

impl LocateReply {
    pub fn found(bbox: [f64; 4]) -> Self {
        Self {
            found: true,
            bbox: Some(bbox),
        }
    }

    pub fn not_found() -> Self {
        Self::default()
    }
}

/// Answer to an assess question.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssessReply {
    /// 0-10, `None` when the model gave no usable score.
    pub quality_score: Option<u8>,
    pub issues: Vec<String>,
    pub needs_refinement: Option<bool>,
    pub refined_bbox: Option<[f64; 4]>,
    /// Caption coverage judged in complete mode, e.g. `fully_included` or `partially_cut`.
    pub caption_status: Option<String>,
    pub caption_text_visible: Option<String>,
}

impl AssessReply {
    pub fn scored(score: u8) -> Self {
        Self {
            quality_score: Some(score),
            ..Self::default()
        }
    }

    pub fn with_refinement(mut self, bbox: [f64; 4]) -> Self {
        self.needs_refinement = Some(true);
        self.refined_bbox = Some(bbox);
        self
    }
}

fn think_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"))
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("valid regex"))
}

/// Strip reasoning blocks and code fences, leaving the JSON payload.
pub fn clean_reply(text: &str) -> String {
    let without_think = think_re().replace_all(text, "");
    // An unterminated <think> means the answer follows the last closing tag, or is lost.
    let without_think = match without_think.rfind("</think>") {
        Some(pos) => &without_think[pos + "</think>".len()..],
        None => &without_think[..],
    };

    if let Some(caps) = fence_re().captures(without_think) {
        return caps[1].trim().to_string();
    }

    // Fall back to the outermost braces.
    match (without_think.find('{'), without_think.rfind('}')) {
        (Some(start), Some(end)) if end > start => without_think[start..=end].to_string(),
        _ => without_think.trim().to_string(),
    }
}

fn parse_object(text: &str) -> Result<serde_json::Map<String, Value>, VisionError> {
    let cleaned = clean_reply(text);
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(VisionError::Parse(format!("expected JSON object, got {}", other))),
        Err(e) => Err(VisionError::Parse(format!("{}: {}", e, truncate(&cleaned, 200)))),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_bbox(value: &Value) -> Option<[f64; 4]> {
    let items = value.as_array()?;
    if items.len() != 4 {
        return None;
    }
    let mut out = [0.0; 4];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = as_number(item)?;
    }
    Some(out)
}

fn as_text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parse a locate reply: `{"bbox": [x1, y1, x2, y2], "found": true}`.
pub fn parse_locate(text: &str) -> Result<LocateReply, VisionError> {
    let map = parse_object(text)?;
    let bbox = map.get("bbox").and_then(as_bbox);
    // Models sometimes omit `found` when they return a box.
    let found = map
        .get("found")
        .and_then(as_bool)
        .unwrap_or(bbox.is_some());

    Ok(LocateReply {
        found: found && bbox.is_some(),
        bbox: if found { bbox } else { None },
    })
}

/// Parse an assess reply.
pub fn parse_assess(text: &str) -> Result<AssessReply, VisionError> {
    let map = parse_object(text)?;

    let quality_score = map
        .get("quality_score")
        .and_then(as_number)
        .filter(|s| s.is_finite())
        .map(|s| s.round().clamp(0.0, 10.0) as u8);

    let issues = match map.get("issues") {
        Some(Value::Array(items)) => items.iter().filter_map(as_text).collect(),
        Some(value) => as_text(value).into_iter().collect(),
        None => Vec::new(),
    };

    Ok(AssessReply {
        quality_score,
        issues,
        needs_refinement: map.get("needs_refinement").and_then(as_bool),
        refined_bbox: map.get("refined_bbox").and_then(as_bbox),
        caption_status: map.get("caption_status").and_then(as_text),
        caption_text_visible: map.get("caption_text_visible").and_then(as_text),
    })
}
