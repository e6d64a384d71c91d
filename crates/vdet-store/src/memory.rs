//! In-memory record store.
//!
//! Used by tests and single-node deployments. All constraint checks
//! live here so behavior matches what a database backend would enforce
//! with unique indexes.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::RwLock;
use tracing::info;

use vdet_models::{
    Detection, ProcessedFrame, ProcessingTask, TaskId, TaskStatus, Video, VideoId, VideoMetadata,
    VideoStatus,
};

use crate::error::{StoreError, StoreResult};
use crate::store::RecordStore;

#[derive(Default)]
struct Inner {
    videos: HashMap<String, Video>,
    detections: Vec<Detection>,
    frames: HashMap<(String, u64), ProcessedFrame>,
    tasks: HashMap<String, ProcessingTask>,
    executions: HashSet<String>,
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_not_terminal(task: &ProcessingTask) -> StoreResult<()> {
        if task.status.is_terminal() {
            return Err(StoreError::TerminalState {
                task_id: task.id.to_string(),
                status: task.status.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_video(&self, video: Video) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let id = video.id.to_string();
        if inner.videos.contains_key(&id) {
            return Err(StoreError::already_exists("video", id));
        }
        inner.videos.insert(id.clone(), video);
        counter!("store_writes_total", "entity" => "video").increment(1);
        info!(video_id = %id, "Created video record");
        Ok(())
    }

    async fn get_video(&self, id: &VideoId) -> StoreResult<Video> {
        let inner = self.inner.read().await;
        inner
            .videos
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::not_found("video", id.as_str()))
    }

    async fn mark_video_processing(&self, id: &VideoId) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let video = inner
            .videos
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::not_found("video", id.as_str()))?;
        *video = video.clone().start_processing();
        Ok(())
    }

    async fn set_video_metadata(&self, id: &VideoId, metadata: VideoMetadata) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let video = inner
            .videos
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::not_found("video", id.as_str()))?;
        *video = video.clone().with_metadata(metadata);
        Ok(())
    }

    async fn complete_video(&self, id: &VideoId, processed_key: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let video = inner
            .videos
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::not_found("video", id.as_str()))?;
        if video.status.is_terminal() {
            return Err(StoreError::already_exists("video (terminal)", id.as_str()));
        }
        *video = video.clone().complete(processed_key);
        counter!("store_writes_total", "entity" => "video").increment(1);
        Ok(())
    }

    async fn fail_video(&self, id: &VideoId, error: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let video = inner
            .videos
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::not_found("video", id.as_str()))?;
        if video.status == VideoStatus::Completed {
            return Err(StoreError::already_exists("video (terminal)", id.as_str()));
        }
        *video = video.clone().fail(error);
        counter!("store_writes_total", "entity" => "video").increment(1);
        Ok(())
    }

    async fn delete_video(&self, id: &VideoId) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.videos.remove(id.as_str()).is_none() {
            return Err(StoreError::not_found("video", id.as_str()));
        }
        // Cascade
        inner.detections.retain(|d| d.video_id != *id);
        inner.frames.retain(|(vid, _), _| vid != id.as_str());
        inner
            .tasks
            .retain(|_, t| t.video_id.as_ref() != Some(id));
        info!(video_id = %id, "Deleted video and dependent records");
        Ok(())
    }

    async fn list_videos(&self) -> StoreResult<Vec<Video>> {
        let inner = self.inner.read().await;
        let mut videos: Vec<Video> = inner.videos.values().cloned().collect();
        videos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(videos)
    }

    async fn insert_detections(&self, detections: Vec<Detection>) -> StoreResult<()> {
        if detections.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.write().await;
        counter!("store_writes_total", "entity" => "detection").increment(detections.len() as u64);
        inner.detections.extend(detections);
        Ok(())
    }

    async fn list_detections(&self, video_id: &VideoId) -> StoreResult<Vec<Detection>> {
        let inner = self.inner.read().await;
        let mut detections: Vec<Detection> = inner
            .detections
            .iter()
            .filter(|d| d.video_id == *video_id)
            .cloned()
            .collect();
        detections.sort_by(|a, b| {
            a.frame_number.cmp(&b.frame_number).then(
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        Ok(detections)
    }

    async fn count_detections(&self, video_id: &VideoId) -> StoreResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner
            .detections
            .iter()
            .filter(|d| d.video_id == *video_id)
            .count() as u64)
    }

    async fn insert_processed_frame(&self, frame: ProcessedFrame) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let key = (frame.video_id.to_string(), frame.frame_number);
        if inner.frames.contains_key(&key) {
            return Err(StoreError::DuplicateFrame {
                video_id: key.0,
                frame_number: key.1,
            });
        }
        inner.frames.insert(key, frame);
        counter!("store_writes_total", "entity" => "processed_frame").increment(1);
        Ok(())
    }

    async fn list_processed_frames(&self, video_id: &VideoId) -> StoreResult<Vec<ProcessedFrame>> {
        let inner = self.inner.read().await;
        let mut frames: Vec<ProcessedFrame> = inner
            .frames
            .values()
            .filter(|f| f.video_id == *video_id)
            .cloned()
            .collect();
        frames.sort_by_key(|f| f.frame_number);
        Ok(frames)
    }

    async fn create_task(&self, task: ProcessingTask) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.executions.contains(&task.execution_id) {
            return Err(StoreError::DuplicateExecution(task.execution_id));
        }
        inner.executions.insert(task.execution_id.clone());
        counter!("store_writes_total", "entity" => "task").increment(1);
        inner.tasks.insert(task.id.to_string(), task);
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> StoreResult<ProcessingTask> {
        let inner = self.inner.read().await;
        inner
            .tasks
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::not_found("task", id.as_str()))
    }

    async fn get_task_by_execution(
        &self,
        execution_id: &str,
    ) -> StoreResult<Option<ProcessingTask>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tasks
            .values()
            .find(|t| t.execution_id == execution_id)
            .cloned())
    }

    async fn set_task_progress(&self, id: &TaskId, progress: u8) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::not_found("task", id.as_str()))?;
        Self::ensure_not_terminal(task)?;
        *task = task.clone().with_progress(progress);
        Ok(())
    }

    async fn complete_task(&self, id: &TaskId, result: serde_json::Value) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::not_found("task", id.as_str()))?;
        Self::ensure_not_terminal(task)?;
        *task = task.clone().complete(result);
        counter!("store_writes_total", "entity" => "task").increment(1);
        Ok(())
    }

    async fn fail_task(&self, id: &TaskId, error: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::not_found("task", id.as_str()))?;
        Self::ensure_not_terminal(task)?;
        *task = task.clone().fail(error);
        counter!("store_writes_total", "entity" => "task").increment(1);
        Ok(())
    }

    async fn list_tasks(&self) -> StoreResult<Vec<ProcessingTask>> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<ProcessingTask> = inner.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn check_connectivity(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdet_models::{BoundingBox, TaskKind};

    fn detection(video: &VideoId, frame: u64, confidence: f32) -> Detection {
        Detection::new(
            video.clone(),
            frame,
            "person",
            confidence,
            BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        )
    }

    #[tokio::test]
    async fn test_video_not_found() {
        let store = MemoryStore::new();
        let err = store.get_video(&VideoId::from("missing")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_video_lifecycle_persisted() {
        let store = MemoryStore::new();
        let video = Video::new("Test", "t.mp4", "uploads/t.mp4");
        let id = video.id.clone();

        store.create_video(video).await.unwrap();
        store.mark_video_processing(&id).await.unwrap();
        store
            .set_video_metadata(&id, VideoMetadata::new(30.0, 300, 640, 480, "h264"))
            .await
            .unwrap();
        store.complete_video(&id, "processed/t.mp4").await.unwrap();

        let stored = store.get_video(&id).await.unwrap();
        assert_eq!(stored.status, VideoStatus::Completed);
        assert_eq!(stored.processed_key.as_deref(), Some("processed/t.mp4"));
        assert!(stored.metadata.is_some());
    }

    #[tokio::test]
    async fn test_completed_video_cannot_fail() {
        let store = MemoryStore::new();
        let video = Video::new("Test", "t.mp4", "uploads/t.mp4");
        let id = video.id.clone();
        store.create_video(video).await.unwrap();
        store.complete_video(&id, "k").await.unwrap();

        assert!(store.fail_video(&id, "late error").await.is_err());
    }

    #[tokio::test]
    async fn test_detection_ordering() {
        let store = MemoryStore::new();
        let video = VideoId::new();

        store
            .insert_detections(vec![
                detection(&video, 30, 0.5),
                detection(&video, 0, 0.7),
                detection(&video, 0, 0.95),
                detection(&video, 30, 0.9),
            ])
            .await
            .unwrap();

        let listed = store.list_detections(&video).await.unwrap();
        let keys: Vec<(u64, f32)> = listed.iter().map(|d| (d.frame_number, d.confidence)).collect();
        assert_eq!(keys, vec![(0, 0.95), (0, 0.7), (30, 0.9), (30, 0.5)]);
        assert_eq!(store.count_detections(&video).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_processed_frame_uniqueness() {
        let store = MemoryStore::new();
        let video = VideoId::new();

        store
            .insert_processed_frame(ProcessedFrame::new(video.clone(), 30, 2))
            .await
            .unwrap();
        let err = store
            .insert_processed_frame(ProcessedFrame::new(video.clone(), 30, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateFrame { frame_number: 30, .. }));

        // Same frame for another video is fine
        store
            .insert_processed_frame(ProcessedFrame::new(VideoId::new(), 30, 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_execution_rejected() {
        let store = MemoryStore::new();
        store
            .create_task(ProcessingTask::new_running("exec-1", TaskKind::VideoProcessing, None))
            .await
            .unwrap();

        let err = store
            .create_task(ProcessingTask::new_running("exec-1", TaskKind::FrameExtraction, None))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateExecution(_)));
    }

    #[tokio::test]
    async fn test_task_progress_monotonic() {
        let store = MemoryStore::new();
        let task = ProcessingTask::new_running("exec-1", TaskKind::VideoProcessing, None);
        let id = task.id.clone();
        store.create_task(task).await.unwrap();

        store.set_task_progress(&id, 50).await.unwrap();
        store.set_task_progress(&id, 20).await.unwrap();
        assert_eq!(store.get_task(&id).await.unwrap().progress, 50);

        store
            .complete_task(&id, serde_json::json!({"ok": true}))
            .await
            .unwrap();
        assert_eq!(store.get_task(&id).await.unwrap().progress, 100);
    }

    #[tokio::test]
    async fn test_terminal_task_is_final() {
        let store = MemoryStore::new();
        let task = ProcessingTask::new_running("exec-1", TaskKind::ObjectDetection, None);
        let id = task.id.clone();
        store.create_task(task).await.unwrap();
        store.fail_task(&id, "model exploded").await.unwrap();

        assert!(matches!(
            store.set_task_progress(&id, 80).await.unwrap_err(),
            StoreError::TerminalState { .. }
        ));
        assert!(store
            .complete_task(&id, serde_json::Value::Null)
            .await
            .is_err());

        let stored = store.get_task(&id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("model exploded"));
    }

    #[tokio::test]
    async fn test_delete_video_cascades() {
        let store = MemoryStore::new();
        let video = Video::new("Test", "t.mp4", "uploads/t.mp4");
        let id = video.id.clone();
        store.create_video(video).await.unwrap();
        store
            .insert_detections(vec![detection(&id, 0, 0.9)])
            .await
            .unwrap();
        store
            .insert_processed_frame(ProcessedFrame::new(id.clone(), 0, 1))
            .await
            .unwrap();
        store
            .create_task(ProcessingTask::new_running(
                "exec-1",
                TaskKind::VideoProcessing,
                Some(id.clone()),
            ))
            .await
            .unwrap();

        store.delete_video(&id).await.unwrap();

        assert_eq!(store.count_detections(&id).await.unwrap(), 0);
        assert!(store.list_processed_frames(&id).await.unwrap().is_empty());
        assert!(store.list_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_task_by_execution() {
        let store = MemoryStore::new();
        let task = ProcessingTask::new_running("exec-42", TaskKind::FrameExtraction, None);
        let id = task.id.clone();
        store.create_task(task).await.unwrap();

        let found = store.get_task_by_execution("exec-42").await.unwrap();
        assert_eq!(found.map(|t| t.id), Some(id));
        assert!(store.get_task_by_execution("nope").await.unwrap().is_none());
    }
}
