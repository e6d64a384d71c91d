//! Processed-frame records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::VideoId;

/// A frame that went through detection, with its annotated blob key.
///
/// At most one record may exist per (video, frame_number).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProcessedFrame {
    /// Video the frame belongs to
    pub video_id: VideoId,

    /// Zero-based frame index within the video
    pub frame_number: u64,

    /// Blob key of the stored frame image, if one was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_key: Option<String>,

    /// Number of detections found on this frame
    pub detection_count: u32,

    /// Wall-clock seconds spent processing this frame
    pub processing_time: f64,

    /// When the frame was processed
    pub processed_at: DateTime<Utc>,
}

impl ProcessedFrame {
    pub fn new(video_id: VideoId, frame_number: u64, detection_count: u32) -> Self {
        Self {
            video_id,
            frame_number,
            frame_key: None,
            detection_count,
            processing_time: 0.0,
            processed_at: Utc::now(),
        }
    }

    pub fn with_frame_key(mut self, key: impl Into<String>) -> Self {
        self.frame_key = Some(key.into());
        self
    }

    pub fn with_processing_time(mut self, seconds: f64) -> Self {
        self.processing_time = seconds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processed_frame_creation() {
        let frame = ProcessedFrame::new(VideoId::from("v1"), 42, 3);
        assert_eq!(frame.frame_number, 42);
        assert_eq!(frame.detection_count, 3);
        assert!(frame.frame_key.is_none());

        let keyed = frame.with_frame_key("frames/v1/frame_000042.jpg");
        assert_eq!(keyed.frame_key.as_deref(), Some("frames/v1/frame_000042.jpg"));
    }

    #[test]
    fn test_processing_time_serialized() {
        let frame = ProcessedFrame::new(VideoId::from("v1"), 0, 1).with_processing_time(0.042);
        assert!((frame.processing_time - 0.042).abs() < f64::EPSILON);

        let json = serde_json::to_value(&frame).unwrap();
        assert!(json.get("processing_time").is_some());
    }
}
