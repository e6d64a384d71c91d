//! Processing task records (the job tracker state machine).

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::VideoId;

/// Unique identifier for a processing task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random task ID.
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

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Full pipeline: probe, detect, annotate, persist
    VideoProcessing,
    /// Detection on explicitly listed frame indices
    ObjectDetection,
    /// JPEG extraction of sampled frames
    FrameExtraction,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::VideoProcessing => "video_processing",
            TaskKind::ObjectDetection => "object_detection",
            TaskKind::FrameExtraction => "frame_extraction",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, not yet picked up
    #[default]
    Pending,
    /// A worker is executing it
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tracked unit of pipeline work.
///
/// Lifecycle: pending -> running -> {completed, failed}. Terminal
/// states are final; progress only moves forward and lands on 100
/// exactly when the task completes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingTask {
    /// Unique task ID
    pub id: TaskId,

    /// Queue delivery id; unique across all tasks
    pub execution_id: String,

    /// Kind of work
    pub kind: TaskKind,

    /// Video the task operates on, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<VideoId>,

    /// Task state
    #[serde(default)]
    pub status: TaskStatus,

    /// Progress (0-100), monotonically non-decreasing
    #[serde(default)]
    pub progress: u8,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Result payload written on completion
    #[serde(default)]
    pub result: serde_json::Value,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Started at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Finished at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProcessingTask {
    /// Create a task that is already running.
    ///
    /// Workers create the tracker row at execution start, so the
    /// pending state is only observed for tasks enqueued ahead of
    /// worker capacity.
    pub fn new_running(
        execution_id: impl Into<String>,
        kind: TaskKind,
        video_id: Option<VideoId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            execution_id: execution_id.into(),
            kind,
            video_id,
            status: TaskStatus::Running,
            progress: 0,
            error_message: None,
            result: serde_json::Value::Null,
            created_at: now,
            started_at: Some(now),
            finished_at: None,
        }
    }

    /// Start a pending task.
    pub fn start(mut self) -> Self {
        if self.status == TaskStatus::Pending {
            self.status = TaskStatus::Running;
            self.started_at = Some(Utc::now());
        }
        self
    }

    /// Update progress; clamped to 0-100 and never moves backwards.
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = progress.min(100).max(self.progress);
        self
    }

    /// Mark completed with a result payload. Progress lands on 100.
    pub fn complete(mut self, result: serde_json::Value) -> Self {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.result = result;
        self.finished_at = Some(Utc::now());
        self
    }

    /// Mark failed with a non-empty error message.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        let error = error.into();
        self.status = TaskStatus::Failed;
        self.error_message = Some(if error.is_empty() {
            "unknown error".to_string()
        } else {
            error
        });
        self.finished_at = Some(Utc::now());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_created_running() {
        let task = ProcessingTask::new_running("exec-1", TaskKind::VideoProcessing, None);
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.started_at.is_some());
        assert_eq!(task.progress, 0);
    }

    #[test]
    fn test_progress_monotonic_and_clamped() {
        let task = ProcessingTask::new_running("exec-1", TaskKind::ObjectDetection, None)
            .with_progress(40)
            .with_progress(10);
        assert_eq!(task.progress, 40);

        let task = task.with_progress(200);
        assert_eq!(task.progress, 100);
    }

    #[test]
    fn test_complete_reaches_100() {
        let task = ProcessingTask::new_running("exec-1", TaskKind::FrameExtraction, None)
            .with_progress(60)
            .complete(serde_json::json!({"frames": 5}));
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert!(task.status.is_terminal());
        assert!(task.finished_at.is_some());
    }

    #[test]
    fn test_fail_keeps_error() {
        let task = ProcessingTask::new_running("exec-1", TaskKind::VideoProcessing, None)
            .fail("decode error at frame 3");
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("decode error at frame 3"));
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(TaskKind::VideoProcessing.as_str(), "video_processing");
        assert_eq!(TaskKind::ObjectDetection.as_str(), "object_detection");
        assert_eq!(TaskKind::FrameExtraction.as_str(), "frame_extraction");
    }
}
