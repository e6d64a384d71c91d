//! Detection records and bounding boxes.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::VideoId;

/// Axis-aligned bounding box in source-pixel units, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    /// Build from corner coordinates (x1, y1, x2, y2).
    ///
    /// Degenerate corners (x2 < x1 or y2 < y1) clamp to a zero-extent
    /// box rather than producing a negative width or height.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// A single detected object on a single frame. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    /// Video the detection belongs to
    pub video_id: VideoId,

    /// Zero-based frame index within the video
    pub frame_number: u64,

    /// Detected class label
    pub class_name: String,

    /// Confidence score in [0, 1]
    pub confidence: f32,

    /// Bounding box in source-pixel units
    pub bbox: BoundingBox,

    /// When the detection was produced
    pub detected_at: DateTime<Utc>,
}

impl Detection {
    pub fn new(
        video_id: VideoId,
        frame_number: u64,
        class_name: impl Into<String>,
        confidence: f32,
        bbox: BoundingBox,
    ) -> Self {
        Self {
            video_id,
            frame_number,
            class_name: class_name.into(),
            confidence,
            bbox,
            detected_at: Utc::now(),
        }
    }

    /// Label rendered on annotated output frames.
    pub fn label(&self) -> String {
        format!("{} {:.2}", self.class_name, self.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_from_corners() {
        let b = BoundingBox::from_corners(10.0, 20.0, 110.0, 70.0);
        assert_eq!(b.x, 10.0);
        assert_eq!(b.y, 20.0);
        assert_eq!(b.width, 100.0);
        assert_eq!(b.height, 50.0);
    }

    #[test]
    fn test_bbox_degenerate_corners_clamped() {
        let b = BoundingBox::from_corners(100.0, 50.0, 40.0, 10.0);
        assert!(b.width >= 0.0);
        assert!(b.height >= 0.0);
        assert_eq!(b.area(), 0.0);
    }

    #[test]
    fn test_detection_label_format() {
        let det = Detection::new(
            VideoId::from("v1"),
            0,
            "person",
            0.873,
            BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        );
        assert_eq!(det.label(), "person 0.87");
    }
}
