//! Prompt text for the locate and assess questions.
//!
//! Three variants exist for each question: sub-figure panels, complete
//! figures (body plus caption and legends), and content-only figures.

use crate::bbox::BoxMode;
use crate::label::FigureLabel;

const LOCATE_REPLY_FORMAT: &str = r#"Coordinates use a 0-1000 scale relative to the page image.

Reply with exactly this JSON:
{"bbox": [x1, y1, x2, y2], "found": true}

If the target is not on this page, reply:
{"bbox": null, "found": false}

Output the JSON only. No commentary, no <think> blocks."#;

const ASSESS_REPLY_FORMAT: &str = r#"Reply with JSON only:
{
    "quality_score": <0-10>,
    "issues": ["concrete problems with the current box"],
    "needs_refinement": true/false,
    "refined_bbox": [x1, y1, x2, y2] or null
}

Output the JSON only. No commentary, no <think> blocks."#;

const ASSESS_COMPLETE_REPLY_FORMAT: &str = r#"Reply with JSON only:
{
    "quality_score": <0-10>,
    "caption_status": "fully_included" | "partially_cut" | "missing" | "cannot_find_caption",
    "caption_text_visible": "<caption text you can read inside the red box, or 'none'>",
    "issues": ["concrete problems with the current box"],
    "needs_refinement": true/false,
    "refined_bbox": [x1, y1, x2, y2] or null
}

If the caption is partially cut, move y2 down by 40-60 units in refined_bbox.

Output the JSON only. No commentary, no <think> blocks."#;

/// Prompt asking for the initial bounding box of `label`.
pub fn locate_prompt(label: &FigureLabel, mode: BoxMode) -> String {
    let name = label.to_string();

    if label.is_subfigure() {
        return format!(
            r#"Find the panel "{name}" on this page and return its bounding box.

"{name}" is one panel of a larger composite figure. Rules:
1. Box only the panel "{name}", not the whole figure.
2. Include the panel's own marker such as "(a)" when it is visible.
3. Leave out the parent figure's caption and every sibling panel.
4. Fit the box tightly around the panel.

{LOCATE_REPLY_FORMAT}"#
        );
    }

    match mode {
        BoxMode::Complete => format!(
            r#"Find "{name}" on this page and return its bounding box.

The box must contain the whole caption. Missing caption lines is the most common mistake.

Step 1, find the caption:
- Figure captions usually sit BELOW the graphic and start with "{name}:" or "{name}.".
- Table captions usually sit ABOVE the table.
- Captions often run over two or three lines. Include every line.

Step 2, also include:
- The graphic or table body.
- Legends, color keys, axis labels and tick marks.
- Panel markers (a), (b), (c) of a composite figure.
- Notes and footnotes that belong to it.

A little extra margin is better than a clipped caption. Allow 20-30 units below the last caption line; one caption line needs roughly 40-60 units of height.

{LOCATE_REPLY_FORMAT}"#
        ),
        BoxMode::ContentOnly => format!(
            r#"Find "{name}" on this page and return the bounding box of its main content only.

Include:
- The chart, diagram, image or table body.
- Axis labels and tick marks that are part of the graphic.
- All panels (a), (b), ... of a composite figure.

Exclude:
- The "{name}" caption and its number.
- Legends or keys printed outside the graphic.
- Footnotes and source lines.

{LOCATE_REPLY_FORMAT}"#
        ),
    }
}

/// Prompt asking the model to grade the red box drawn on the page.
pub fn assess_prompt(label: &FigureLabel, mode: BoxMode, current: [f64; 4]) -> String {
    let name = label.to_string();
    let current = format!(
        "[{}, {}, {}, {}]",
        current[0], current[1], current[2], current[3]
    );

    if label.is_subfigure() {
        return format!(
            r#"The red rectangle on this page is a proposed crop of the panel "{name}", one part of a composite figure.
Current box (0-1000 scale): {current}

Check:
1. Does the rectangle contain only the panel "{name}"?
2. Is the panel marker such as "(a)" inside it?
3. Are sibling panels and the parent caption kept out?

Scoring, be strict:
- 10: exactly this panel
- 8-9: small boundary slack
- 5-7: overlaps a sibling panel or clips content
- 0-4: wrong panel or badly off

If the box should change, give the corrected box in refined_bbox (0-1000 scale).

{ASSESS_REPLY_FORMAT}"#
        );
    }

    match mode {
        BoxMode::Complete => format!(
            r#"The red rectangle on this page is a proposed crop of "{name}".
Current box (0-1000 scale): {current}

Check, in order:
1. Find the caption starting with "{name}:" or "{name}." (below figures, above tables).
2. Is every line of that caption inside the rectangle?
3. Is the full graphic or table body inside?
4. Are legends, axis labels and notes inside?
5. Does the rectangle pick up other figures, tables or body text?

Scoring:
- 10: complete content and caption, nothing extra
- 8-9: slight boundary slack
- 6-7: caption partly clipped or legend missing
- 0-5: major problems

If the box should change, give the corrected box in refined_bbox (0-1000 scale).
When there is clear white space below the content, the caption may already be complete; check before reporting it as cut.

{ASSESS_COMPLETE_REPLY_FORMAT}"#
        ),
        BoxMode::ContentOnly => format!(
            r#"The red rectangle on this page is a proposed crop of the main content of "{name}", without its caption.
Current box (0-1000 scale): {current}

It should contain:
- The chart, diagram or table body.
- Axis labels that belong to the graphic.
- Legends drawn inside the graphic.

It should leave out:
- The caption ("{name}: ...").
- Notes and footnotes outside the graphic.

Scoring:
- 10: exactly the main content
- 8-9: slight boundary slack
- 5-7: includes the caption or clips content
- 0-4: major problems

If the box should change, give the corrected box in refined_bbox (0-1000 scale).

{ASSESS_REPLY_FORMAT}"#
        ),
    }
}
