//! Job types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vdet_models::{TaskId, TaskKind, VideoId};

/// Job to run the full pipeline on an uploaded video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessVideoJob {
    /// Unique job ID
    pub job_id: TaskId,
    /// Video to process
    pub video_id: VideoId,
    /// Detect on every n-th frame
    pub sampling_interval: u32,
    /// Confidence threshold; worker default when absent
    pub confidence_threshold: Option<f32>,
    /// Whether to render the annotated output video
    pub annotate: bool,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl ProcessVideoJob {
    pub fn new(video_id: VideoId, sampling_interval: u32) -> Self {
        Self {
            job_id: TaskId::new(),
            video_id,
            sampling_interval,
            confidence_threshold: None,
            annotate: true,
            created_at: Utc::now(),
        }
    }

    /// Set the confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }

    /// Skip the annotated output.
    pub fn without_annotation(mut self) -> Self {
        self.annotate = false;
        self
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("process:{}", self.video_id)
    }
}

/// Job to detect objects on an explicit list of frame indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectObjectsJob {
    /// Unique job ID
    pub job_id: TaskId,
    /// Video to read frames from
    pub video_id: VideoId,
    /// Frame indices to detect on
    pub frame_indices: Vec<u64>,
    /// Confidence threshold; worker default when absent
    pub confidence_threshold: Option<f32>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl DetectObjectsJob {
    pub fn new(video_id: VideoId, frame_indices: Vec<u64>) -> Self {
        Self {
            job_id: TaskId::new(),
            video_id,
            frame_indices,
            confidence_threshold: None,
            created_at: Utc::now(),
        }
    }

    /// Spot requests for the same video are legitimate repeats, so the
    /// key only dedups redelivery of this exact job.
    pub fn idempotency_key(&self) -> String {
        format!("detect:{}:{}", self.video_id, self.job_id)
    }
}

/// Job to extract sampled frames as JPEGs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractFramesJob {
    /// Unique job ID
    pub job_id: TaskId,
    /// Video to extract from
    pub video_id: VideoId,
    /// Keep every n-th frame
    pub sampling_interval: u32,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl ExtractFramesJob {
    pub fn new(video_id: VideoId, sampling_interval: u32) -> Self {
        Self {
            job_id: TaskId::new(),
            video_id,
            sampling_interval,
            created_at: Utc::now(),
        }
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("extract:{}:{}", self.video_id, self.sampling_interval)
    }
}

/// Any job the worker can consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    ProcessVideo(ProcessVideoJob),
    DetectObjects(DetectObjectsJob),
    ExtractFrames(ExtractFramesJob),
}

impl QueueJob {
    /// The job's unique ID.
    pub fn job_id(&self) -> &TaskId {
        match self {
            QueueJob::ProcessVideo(j) => &j.job_id,
            QueueJob::DetectObjects(j) => &j.job_id,
            QueueJob::ExtractFrames(j) => &j.job_id,
        }
    }

    /// The video the job operates on.
    pub fn video_id(&self) -> &VideoId {
        match self {
            QueueJob::ProcessVideo(j) => &j.video_id,
            QueueJob::DetectObjects(j) => &j.video_id,
            QueueJob::ExtractFrames(j) => &j.video_id,
        }
    }

    /// The task kind this job maps to.
    pub fn kind(&self) -> TaskKind {
        match self {
            QueueJob::ProcessVideo(_) => TaskKind::VideoProcessing,
            QueueJob::DetectObjects(_) => TaskKind::ObjectDetection,
            QueueJob::ExtractFrames(_) => TaskKind::FrameExtraction,
        }
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::ProcessVideo(j) => j.idempotency_key(),
            QueueJob::DetectObjects(j) => j.idempotency_key(),
            QueueJob::ExtractFrames(j) => j.idempotency_key(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_round_trip() {
        let job = QueueJob::ProcessVideo(ProcessVideoJob::new(VideoId::from("v1"), 30));
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"type\":\"process_video\""));

        let back: QueueJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), TaskKind::VideoProcessing);
        assert_eq!(back.video_id().as_str(), "v1");
    }

    #[test]
    fn test_kind_mapping() {
        let detect = QueueJob::DetectObjects(DetectObjectsJob::new(VideoId::new(), vec![0, 5]));
        let extract = QueueJob::ExtractFrames(ExtractFramesJob::new(VideoId::new(), 10));
        assert_eq!(detect.kind(), TaskKind::ObjectDetection);
        assert_eq!(extract.kind(), TaskKind::FrameExtraction);
    }

    #[test]
    fn test_process_idempotency_key_per_video() {
        let a = ProcessVideoJob::new(VideoId::from("v1"), 30);
        let b = ProcessVideoJob::new(VideoId::from("v1"), 15);
        assert_eq!(a.idempotency_key(), b.idempotency_key());
    }
}
