//! Video records and probed metadata.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Video processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Uploaded, waiting for a worker
    #[default]
    Pending,
    /// A worker is running detection on it
    Processing,
    /// Processing completed successfully
    Completed,
    /// Processing failed
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Completed | VideoStatus::Failed)
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Technical metadata probed from the video file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoMetadata {
    /// Frames per second
    pub fps: f64,

    /// Total number of frames
    pub frame_count: u64,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Duration in seconds, derived from frame_count and fps
    pub duration_seconds: f64,

    /// Video codec name
    #[serde(default)]
    pub codec: String,

    /// Container file size in bytes
    #[serde(default)]
    pub file_size_bytes: u64,
}

impl VideoMetadata {
    /// Build metadata, deriving the duration from frame count and fps.
    ///
    /// A non-positive fps yields a duration of 0 rather than a
    /// division artifact (NaN/inf).
    pub fn new(fps: f64, frame_count: u64, width: u32, height: u32, codec: impl Into<String>) -> Self {
        Self {
            fps,
            frame_count,
            width,
            height,
            duration_seconds: Self::duration(frame_count, fps),
            codec: codec.into(),
            file_size_bytes: 0,
        }
    }

    /// Set the container file size.
    pub fn with_file_size(mut self, bytes: u64) -> Self {
        self.file_size_bytes = bytes;
        self
    }

    /// Duration in seconds; 0 when fps is not positive.
    pub fn duration(frame_count: u64, fps: f64) -> f64 {
        if fps > 0.0 {
            frame_count as f64 / fps
        } else {
            0.0
        }
    }
}

/// An uploaded video and its processing lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Video {
    /// Unique video ID
    pub id: VideoId,

    /// Display title
    pub title: String,

    /// Original filename as uploaded
    pub original_filename: String,

    /// Blob key of the uploaded source object
    pub upload_key: String,

    /// Blob key of the annotated output; set only on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_key: Option<String>,

    /// Processing status
    #[serde(default)]
    pub status: VideoStatus,

    /// Probed metadata; absent until processing has probed the file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VideoMetadata>,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// When a worker started processing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,

    /// When processing reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_completed_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Video {
    /// Create a new pending video record.
    pub fn new(
        title: impl Into<String>,
        original_filename: impl Into<String>,
        upload_key: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: VideoId::new(),
            title: title.into(),
            original_filename: original_filename.into(),
            upload_key: upload_key.into(),
            processed_key: None,
            status: VideoStatus::Pending,
            metadata: None,
            error_message: None,
            processing_started_at: None,
            processing_completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark as being processed.
    pub fn start_processing(mut self) -> Self {
        let now = Utc::now();
        self.status = VideoStatus::Processing;
        self.processing_started_at = Some(now);
        self.updated_at = now;
        self
    }

    /// Attach probed metadata.
    pub fn with_metadata(mut self, metadata: VideoMetadata) -> Self {
        self.metadata = Some(metadata);
        self.updated_at = Utc::now();
        self
    }

    /// Mark as completed with the annotated output key.
    pub fn complete(mut self, processed_key: impl Into<String>) -> Self {
        let now = Utc::now();
        self.status = VideoStatus::Completed;
        self.processed_key = Some(processed_key.into());
        self.processing_completed_at = Some(now);
        self.updated_at = now;
        self
    }

    /// Mark as failed with a non-empty error message.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        let error = error.into();
        let now = Utc::now();
        self.status = VideoStatus::Failed;
        self.error_message = Some(if error.is_empty() {
            "unknown error".to_string()
        } else {
            error
        });
        self.processing_completed_at = Some(now);
        self.updated_at = now;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_id_generation() {
        let id1 = VideoId::new();
        let id2 = VideoId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_duration_from_frames() {
        let meta = VideoMetadata::new(30.0, 300, 1280, 720, "h264");
        assert!((meta.duration_seconds - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_duration_zero_fps() {
        assert_eq!(VideoMetadata::duration(300, 0.0), 0.0);
        assert_eq!(VideoMetadata::duration(300, -1.0), 0.0);
        let meta = VideoMetadata::new(0.0, 300, 640, 480, "h264");
        assert!(meta.duration_seconds.is_finite());
        assert_eq!(meta.duration_seconds, 0.0);
    }

    #[test]
    fn test_video_lifecycle() {
        let video = Video::new("Test", "test.mp4", "uploads/test.mp4");
        assert_eq!(video.status, VideoStatus::Pending);
        assert!(video.metadata.is_none());
        assert!(video.processed_key.is_none());
        assert!(video.processing_started_at.is_none());

        let processing = video.start_processing();
        assert_eq!(processing.status, VideoStatus::Processing);
        assert!(processing.processing_started_at.is_some());
        assert!(processing.processing_completed_at.is_none());

        let completed = processing.complete("processed/test_annotated.mp4");
        assert_eq!(completed.status, VideoStatus::Completed);
        assert!(completed.status.is_terminal());
        assert_eq!(
            completed.processed_key.as_deref(),
            Some("processed/test_annotated.mp4")
        );
        assert!(completed.processing_completed_at.is_some());
    }

    #[test]
    fn test_processing_timestamps_serialized() {
        let video = Video::new("Test", "t.mp4", "uploads/t.mp4").start_processing();
        let json = serde_json::to_value(&video).unwrap();
        assert!(json.get("processing_started_at").is_some());

        let failed: Video = serde_json::from_value(json).unwrap();
        let failed = failed.fail("decode exploded");
        assert!(failed.processing_completed_at.is_some());
    }

    #[test]
    fn test_metadata_file_size() {
        let meta = VideoMetadata::new(30.0, 300, 1280, 720, "h264").with_file_size(1_048_576);
        assert_eq!(meta.file_size_bytes, 1_048_576);

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["file_size_bytes"], 1_048_576);
    }

    #[test]
    fn test_fail_never_leaves_empty_error() {
        let failed = Video::new("Test", "t.mp4", "uploads/t.mp4").fail("");
        assert!(!failed.error_message.as_deref().unwrap_or("").is_empty());
    }
}
