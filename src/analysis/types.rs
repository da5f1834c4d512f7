//! Analysis results: text summaries and detection sets.

use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;

/// Coordinate space a bounding box is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSpace {
    /// Fractions of the image width/height, in `[0, 1]`.
    Normalized,
    /// Absolute pixels.
    Pixel,
}

/// Axis-aligned box with `x_min <= x_max` and `y_min <= y_max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    x_min: f32,
    y_min: f32,
    x_max: f32,
    y_max: f32,
    space: CoordinateSpace,
}

impl BoundingBox {
    /// Creates a box from two corners, ordering each axis.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32, space: CoordinateSpace) -> Self {
        Self {
            x_min: x0.min(x1),
            y_min: y0.min(y1),
            x_max: x0.max(x1),
            y_max: y0.max(y1),
            space,
        }
    }

    /// Returns `(x_min, y_min, x_max, y_max)`.
    pub fn corners(&self) -> (f32, f32, f32, f32) {
        (self.x_min, self.y_min, self.x_max, self.y_max)
    }

    /// Coordinate space of the corners.
    pub fn space(&self) -> CoordinateSpace {
        self.space
    }

    /// Stretches a pixel box by `(sx, sy)`, e.g. from a downscaled copy back
    /// onto the original. Normalized boxes are returned unchanged.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        match self.space {
            CoordinateSpace::Normalized => *self,
            CoordinateSpace::Pixel => Self {
                x_min: self.x_min * sx,
                y_min: self.y_min * sy,
                x_max: self.x_max * sx,
                y_max: self.y_max * sy,
                space: CoordinateSpace::Pixel,
            },
        }
    }

    /// Converts to integer pixel corners for an image of the given size,
    /// clamped to the image bounds.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let (sx, sy) = match self.space {
            CoordinateSpace::Normalized => (width as f32, height as f32),
            CoordinateSpace::Pixel => (1.0, 1.0),
        };
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        let px = |v: f32, scale: f32, max: f32| (v * scale).round().clamp(0.0, max) as u32;
        (
            px(self.x_min, sx, max_x),
            px(self.y_min, sy, max_y),
            px(self.x_max, sx, max_x),
            px(self.y_max, sy, max_y),
        )
    }
}

/// One labeled bounding box produced by the remote analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Label as returned by the model.
    pub label: String,
    /// Location in the image.
    pub bbox: BoundingBox,
    /// Model confidence in `[0, 1]`, when reported.
    pub confidence: Option<f32>,
}

impl Detection {
    /// Creates a detection without a confidence score.
    pub fn new(label: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            bbox,
            confidence: None,
        }
    }

    /// Sets the confidence score.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

impl Serialize for Detection {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let fields = if self.confidence.is_some() { 3 } else { 2 };
        let mut state = serializer.serialize_struct("Detection", fields)?;
        state.serialize_field("label", &self.label)?;
        let (x0, y0, x1, y1) = self.bbox.corners();
        state.serialize_field("box", &[x0, y0, x1, y1])?;
        if let Some(confidence) = self.confidence {
            state.serialize_field("confidence", &confidence)?;
        }
        state.end()
    }
}

/// Outcome of analyzing one media file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum AnalysisResult {
    /// Free-text summary (video mode).
    TextSummary(String),
    /// Ordered detections (image mode).
    DetectionSet(Vec<Detection>),
}

impl AnalysisResult {
    /// Returns the detections, if this is a detection set.
    pub fn detections(&self) -> Option<&[Detection]> {
        match self {
            Self::DetectionSet(items) => Some(items),
            Self::TextSummary(_) => None,
        }
    }

    /// Returns the summary text, if this is a text summary.
    pub fn summary(&self) -> Option<&str> {
        match self {
            Self::TextSummary(text) => Some(text),
            Self::DetectionSet(_) => None,
        }
    }
}
