//! Output grammar parser
//!
//! Turns the decoded model output into a [`Florence2Result`]. The parser is
//! picked from the task's [`ReturnFlags`](crate::tasks::ReturnFlags):
//!
//! | Flags | Grammar | Result |
//! |---|---|---|
//! | text | anything | [`Florence2Result::Text`] |
//! | labels + boxes | `label (<loc>{4})+` | [`Florence2Result::Boxes`] |
//! | labels + boxes + polygons | `label <loc>{8}` | [`Florence2Result::BoxesAndPolygons`] |
//! | labels + polygons | `label <poly> <loc>* </poly>` | [`Florence2Result::Polygons`] |
//! | polygons | `<loc>*` | [`Florence2Result::Polygons`], one unlabeled polygon |
//!
//! Output that matches nothing yields empty collections, never an error.

use crate::error::{Florence2Error, Result};
use crate::tasks::{
    parse_loc_tokens, token_pair_to_point, tokens_to_coordinates, PointF, RectF, ReturnFlags,
    TaskType,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Tokens removed from the decoded text before parsing
const CLEANUP_TOKENS: [&str; 3] = ["<s>", "</s>", "<pad>"];

static LABELED_BOXES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<label>[^<>]*)(?P<locs>(?:<loc_\d+>)+)").expect("valid labeled box regex")
});

static LABELED_QUADS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<label>[^<>]*)(?P<locs>(?:<loc_\d+>){8})").expect("valid labeled quad regex")
});

static LABELED_POLYGONS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<label>[^<>]*)<poly>(?P<locs>(?:<loc_\d+>)*)</poly>")
        .expect("valid labeled polygon regex")
});

/// Structured output of one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Florence2Result {
    /// Captions, OCR text, region descriptions
    Text { text: String },
    /// One label per box; a label repeats when it owns several boxes
    Boxes {
        labels: Vec<String>,
        boxes: Vec<RectF>,
    },
    /// Labeled `<poly>` output (one polygon per label) or a single unlabeled
    /// segmentation polygon (empty `labels`)
    Polygons {
        labels: Vec<String>,
        polygons: Vec<Vec<PointF>>,
    },
    /// Quadrilaterals with their envelope rectangles, parallel to `labels`
    BoxesAndPolygons {
        labels: Vec<String>,
        boxes: Vec<RectF>,
        polygons: Vec<Vec<PointF>>,
    },
}

impl Florence2Result {
    #[must_use = "returns the text, if this is a text result"]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    #[must_use = "returns the labels"]
    pub fn labels(&self) -> &[String] {
        match self {
            Self::Text { .. } => &[],
            Self::Boxes { labels, .. }
            | Self::Polygons { labels, .. }
            | Self::BoxesAndPolygons { labels, .. } => labels,
        }
    }

    #[must_use = "returns the boxes"]
    pub fn boxes(&self) -> &[RectF] {
        match self {
            Self::Boxes { boxes, .. } | Self::BoxesAndPolygons { boxes, .. } => boxes,
            _ => &[],
        }
    }

    #[must_use = "returns the polygons"]
    pub fn polygons(&self) -> &[Vec<PointF>] {
        match self {
            Self::Polygons { polygons, .. } | Self::BoxesAndPolygons { polygons, .. } => polygons,
            _ => &[],
        }
    }
}

/// Remove `<s>`, `</s>` and `<pad>` from decoded text
#[must_use = "returns the cleaned text"]
pub fn clean_output(text: &str) -> String {
    CLEANUP_TOKENS
        .iter()
        .fold(text.to_string(), |acc, token| acc.replace(token, ""))
}

/// Parse decoded model output for `task`
///
/// `canvas` is the pixel extent of the 0..999 grid (see
/// [`canvas_size`](crate::preprocessing::canvas_size)).
///
/// # Errors
///
/// [`Florence2Error::ConfigError`] naming the task when its return flags name no
/// supported output shape.
pub fn parse_output(task: TaskType, text: &str, canvas: (f32, f32)) -> Result<Florence2Result> {
    parse_with_flags(task, task.config().returns, &clean_output(text), canvas)
}

fn parse_with_flags(
    task: TaskType,
    flags: ReturnFlags,
    cleaned: &str,
    canvas: (f32, f32),
) -> Result<Florence2Result> {
    if flags.text {
        return Ok(Florence2Result::Text {
            text: cleaned.to_string(),
        });
    }
    match (flags.labels, flags.bounding_boxes, flags.polygons) {
        (true, true, true) => Ok(parse_labeled_quads(cleaned, canvas)),
        (true, true, false) => Ok(parse_labeled_boxes(cleaned, canvas)),
        (true, false, true) => Ok(parse_labeled_polygons(cleaned, canvas)),
        (false, false, true) => Ok(parse_polygon(cleaned, canvas)),
        _ => Err(Florence2Error::config(format!(
            "Task {task} has no supported output shape ({flags:?})"
        ))),
    }
}

/// `label<loc>{4}(<loc>{4})*` -> one box per group of four
#[must_use = "returns the parsed boxes"]
pub fn parse_labeled_boxes(text: &str, canvas: (f32, f32)) -> Florence2Result {
    let mut labels = Vec::new();
    let mut boxes = Vec::new();

    for caps in LABELED_BOXES_RE.captures_iter(text) {
        let label = caps["label"].trim();
        let values = parse_loc_tokens(&caps["locs"]);
        for chunk in values.chunks_exact(4) {
            labels.push(label.to_string());
            boxes.push(tokens_to_coordinates(
                [chunk[0], chunk[1], chunk[2], chunk[3]],
                canvas,
            ));
        }
    }

    Florence2Result::Boxes { labels, boxes }
}

/// `label<loc>{8}` -> quadrilateral plus its envelope
#[must_use = "returns the parsed quadrilaterals"]
pub fn parse_labeled_quads(text: &str, canvas: (f32, f32)) -> Florence2Result {
    let mut labels = Vec::new();
    let mut boxes = Vec::new();
    let mut polygons = Vec::new();

    for caps in LABELED_QUADS_RE.captures_iter(text) {
        let points = to_points(&parse_loc_tokens(&caps["locs"]), canvas);
        let Some(envelope) = RectF::envelope(&points) else {
            continue;
        };
        labels.push(caps["label"].trim().to_string());
        boxes.push(envelope);
        polygons.push(points);
    }

    Florence2Result::BoxesAndPolygons {
        labels,
        boxes,
        polygons,
    }
}

/// `label<poly><loc>*</poly>` -> one polygon per label
#[must_use = "returns the parsed polygons"]
pub fn parse_labeled_polygons(text: &str, canvas: (f32, f32)) -> Florence2Result {
    let mut labels = Vec::new();
    let mut polygons = Vec::new();

    for caps in LABELED_POLYGONS_RE.captures_iter(text) {
        labels.push(caps["label"].trim().to_string());
        polygons.push(to_points(&parse_loc_tokens(&caps["locs"]), canvas));
    }

    Florence2Result::Polygons { labels, polygons }
}

/// Every location token pair in `text` -> one unlabeled polygon
#[must_use = "returns the parsed polygon"]
pub fn parse_polygon(text: &str, canvas: (f32, f32)) -> Florence2Result {
    let points = to_points(&parse_loc_tokens(text), canvas);
    let polygons = if points.is_empty() {
        Vec::new()
    } else {
        vec![points]
    };
    Florence2Result::Polygons {
        labels: Vec::new(),
        polygons,
    }
}

// Odd trailing values are dropped
fn to_points(values: &[u32], canvas: (f32, f32)) -> Vec<PointF> {
    values
        .chunks_exact(2)
        .map(|pair| token_pair_to_point(pair[0], pair[1], canvas))
        .collect()
}
