use crate::foundation::error::{TrajviewError, TrajviewResult};

pub use kurbo::{Affine, Point, Vec2};

/// Absolute frame number as recorded in the track data.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct FrameIndex(pub u64);

impl FrameIndex {
    /// Move by `delta` frames using saturating arithmetic.
    pub fn offset(self, delta: i64) -> Self {
        if delta >= 0 {
            Self(self.0.saturating_add(delta as u64))
        } else {
            Self(self.0.saturating_sub(delta.unsigned_abs()))
        }
    }
}

impl std::fmt::Display for FrameIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier of one tracked object.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed frame span `[first, last]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameSpan {
    /// Inclusive first frame.
    pub first: FrameIndex,
    /// Inclusive last frame.
    pub last: FrameIndex,
}

impl FrameSpan {
    /// Create a validated span with `first <= last`.
    pub fn new(first: FrameIndex, last: FrameIndex) -> TrajviewResult<Self> {
        if first > last {
            return Err(TrajviewError::validation("FrameSpan first must be <= last"));
        }
        Ok(Self { first, last })
    }

    /// Span holding a single frame.
    pub fn single(frame: FrameIndex) -> Self {
        Self {
            first: frame,
            last: frame,
        }
    }

    /// Number of frame numbers covered, including frames without data.
    pub fn len_frames(self) -> u64 {
        self.last.0 - self.first.0 + 1
    }

    pub fn clamp(self, f: FrameIndex) -> FrameIndex {
        FrameIndex(f.0.clamp(self.first.0, self.last.0))
    }

    /// Grow the span so it also covers `f`.
    pub fn include(self, f: FrameIndex) -> Self {
        Self {
            first: self.first.min(f),
            last: self.last.max(f),
        }
    }
}

/// Straight-alpha RGBA8 color used for box outlines and labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Rgba8(pub [u8; 4]);

impl Rgba8 {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }
}

/// Fixed pixel <-> world scale shared by every coordinate and dimension.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CoordinateScale {
    /// Real-world meters covered by one background pixel.
    pub meters_per_pixel: f64,
}

impl Default for CoordinateScale {
    fn default() -> Self {
        Self {
            meters_per_pixel: 0.049_996_724_944_594_2,
        }
    }
}

impl CoordinateScale {
    pub fn new(meters_per_pixel: f64) -> TrajviewResult<Self> {
        if !(meters_per_pixel.is_finite() && meters_per_pixel > 0.0) {
            return Err(TrajviewError::validation(
                "meters_per_pixel must be finite and > 0",
            ));
        }
        Ok(Self { meters_per_pixel })
    }

    pub fn to_meters(self, px: f64) -> f64 {
        px * self.meters_per_pixel
    }

    pub fn to_pixels(self, meters: f64) -> f64 {
        meters / self.meters_per_pixel
    }

    /// World position (y up) to background pixel position (y down).
    pub fn world_to_image(self, x: f64, y: f64) -> Point {
        Point::new(self.to_pixels(x), -self.to_pixels(y))
    }
}
