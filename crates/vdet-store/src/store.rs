//! The record store trait.
//!
//! Every backend must uphold the same constraints: one processed-frame
//! row per (video, frame_number), globally unique execution ids,
//! monotonic task progress, and no transitions out of a terminal task
//! state. Workers hold the store as `Arc<dyn RecordStore>` so backends
//! and test doubles are interchangeable.

use async_trait::async_trait;

use vdet_models::{Detection, ProcessedFrame, ProcessingTask, TaskId, Video, VideoId, VideoMetadata};

use crate::error::StoreResult;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    // Videos

    async fn create_video(&self, video: Video) -> StoreResult<()>;

    /// Fetch a video; absent ids are a `NotFound` error.
    async fn get_video(&self, id: &VideoId) -> StoreResult<Video>;

    async fn mark_video_processing(&self, id: &VideoId) -> StoreResult<()>;

    /// Attach probed metadata to a video row.
    async fn set_video_metadata(&self, id: &VideoId, metadata: VideoMetadata) -> StoreResult<()>;

    /// Complete a video; the processed key may only be set here.
    async fn complete_video(&self, id: &VideoId, processed_key: &str) -> StoreResult<()>;

    async fn fail_video(&self, id: &VideoId, error: &str) -> StoreResult<()>;

    /// Delete a video and cascade to its detections, frames and tasks.
    async fn delete_video(&self, id: &VideoId) -> StoreResult<()>;

    async fn list_videos(&self) -> StoreResult<Vec<Video>>;

    // Detections

    /// Bulk-insert detections for one frame. Detections are immutable
    /// once written.
    async fn insert_detections(&self, detections: Vec<Detection>) -> StoreResult<()>;

    /// List a video's detections ordered by frame number ascending,
    /// then confidence descending.
    async fn list_detections(&self, video_id: &VideoId) -> StoreResult<Vec<Detection>>;

    async fn count_detections(&self, video_id: &VideoId) -> StoreResult<u64>;

    // Processed frames

    /// Insert a processed-frame row; a second row for the same
    /// (video, frame_number) is a `DuplicateFrame` error.
    async fn insert_processed_frame(&self, frame: ProcessedFrame) -> StoreResult<()>;

    /// List processed frames ordered by frame number ascending.
    async fn list_processed_frames(&self, video_id: &VideoId) -> StoreResult<Vec<ProcessedFrame>>;

    // Tasks

    /// Create a task row; a second task with the same execution id is
    /// a `DuplicateExecution` error.
    async fn create_task(&self, task: ProcessingTask) -> StoreResult<()>;

    async fn get_task(&self, id: &TaskId) -> StoreResult<ProcessingTask>;

    async fn get_task_by_execution(&self, execution_id: &str)
        -> StoreResult<Option<ProcessingTask>>;

    /// Set task progress. Regressions are ignored (progress is
    /// monotonic); writes to terminal tasks are rejected.
    async fn set_task_progress(&self, id: &TaskId, progress: u8) -> StoreResult<()>;

    /// Complete a task with a result payload; progress lands on 100.
    async fn complete_task(&self, id: &TaskId, result: serde_json::Value) -> StoreResult<()>;

    /// Fail a task with a non-empty error message.
    async fn fail_task(&self, id: &TaskId, error: &str) -> StoreResult<()>;

    async fn list_tasks(&self) -> StoreResult<Vec<ProcessingTask>>;

    /// Cheap connectivity probe for startup health checks.
    async fn check_connectivity(&self) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vdet_models::VideoId;

    #[tokio::test]
    async fn test_mock_store_substitutes_for_a_backend() {
        let mut mock = MockRecordStore::new();
        mock.expect_check_connectivity().returning(|| Ok(()));
        mock.expect_count_detections().returning(|_| Ok(42));

        let store: Arc<dyn RecordStore> = Arc::new(mock);
        store.check_connectivity().await.unwrap();
        let count = store.count_detections(&VideoId::new()).await.unwrap();
        assert_eq!(count, 42);
    }
}
