// Location tokens: the 0..999 coordinate grid Florence-2 reads and writes
//
//   normalized [0, 1]  --floor(v * 1000), clamp [0, 999]-->  <loc_N>
//   <loc_N>            --(0.5 + N) * (dim / 1000)-------->  pixel (bucket center)

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Number of buckets per axis
pub const LOC_BINS: u32 = 1000;

static LOC_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<loc_(\d+)>").expect("valid location token regex"));

/// Point in pixel space
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PointF {
    pub x: f32,
    pub y: f32,
}

impl PointF {
    #[inline]
    #[must_use = "returns a new point"]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in pixel space
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RectF {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RectF {
    #[inline]
    #[must_use = "returns a new rectangle"]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle spanning two corners
    #[inline]
    #[must_use = "returns a new rectangle"]
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Min/max envelope of `points`, or `None` if empty
    #[must_use = "returns the bounding rectangle"]
    pub fn envelope(points: &[PointF]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::from_corners(min_x, min_y, max_x, max_y))
    }

    #[inline]
    #[must_use = "returns the right edge"]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    #[inline]
    #[must_use = "returns the bottom edge"]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// Region argument for region tasks, as fractions of the image size
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    #[inline]
    #[must_use = "returns a new normalized rectangle"]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// `x1, y1, x2, y2` on the 0..999 grid
    #[must_use = "returns the grid coordinates"]
    pub fn to_bins(&self) -> [u32; 4] {
        [
            normalized_to_bin(self.x),
            normalized_to_bin(self.y),
            normalized_to_bin(self.x + self.width),
            normalized_to_bin(self.y + self.height),
        ]
    }

    /// The four location tokens naming this region
    #[must_use = "returns the location token string"]
    pub fn to_loc_tokens(&self) -> String {
        self.to_bins().iter().map(|&bin| loc_token(bin)).collect()
    }
}

/// `floor(v * 1000)` clamped to `[0, 999]`; NaN maps to 0
#[inline]
#[must_use = "returns the grid coordinate"]
pub fn normalized_to_bin(value: f32) -> u32 {
    let scaled = (value * LOC_BINS as f32).floor();
    if scaled.is_nan() {
        return 0;
    }
    scaled.clamp(0.0, (LOC_BINS - 1) as f32) as u32
}

/// Center of bucket `value` along an axis of `dim` pixels
///
/// Values past the grid are treated as the last bucket.
#[inline]
#[must_use = "returns the pixel coordinate"]
pub fn bin_to_pixel(value: u32, dim: f32) -> f32 {
    (0.5 + value.min(LOC_BINS - 1) as f32) * (dim / LOC_BINS as f32)
}

#[inline]
#[must_use = "returns the location token"]
pub fn loc_token(value: u32) -> String {
    format!("<loc_{value}>")
}

/// Values of every `<loc_N>` token in `text`, in order
///
/// Values above 999 clamp to 999 so coordinate groups stay aligned.
#[must_use = "returns the parsed location values"]
pub fn parse_loc_tokens(text: &str) -> Vec<u32> {
    let last = LOC_BINS - 1;
    LOC_TOKEN_RE
        .captures_iter(text)
        // Digits only, so a parse failure is an overflow
        .map(|caps| caps[1].parse::<u32>().map_or(last, |value| value.min(last)))
        .collect()
}

/// Convert `[x1, y1, x2, y2]` grid values to a pixel rectangle on `canvas` (width, height)
#[must_use = "returns the pixel rectangle"]
pub fn tokens_to_coordinates(tokens: [u32; 4], canvas: (f32, f32)) -> RectF {
    let (width, height) = canvas;
    RectF::from_corners(
        bin_to_pixel(tokens[0], width),
        bin_to_pixel(tokens[1], height),
        bin_to_pixel(tokens[2], width),
        bin_to_pixel(tokens[3], height),
    )
}

/// Convert one `(x, y)` grid pair to a pixel point on `canvas`
#[inline]
#[must_use = "returns the pixel point"]
pub fn token_pair_to_point(x: u32, y: u32, canvas: (f32, f32)) -> PointF {
    PointF::new(bin_to_pixel(x, canvas.0), bin_to_pixel(y, canvas.1))
}
