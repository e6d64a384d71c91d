//! Shared processing context.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use vdet_media::{ObjectDetector, ObjectDetectorConfig};
use vdet_models::VideoId;
use vdet_storage::BlobStore;
use vdet_store::RecordStore;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;

/// Everything a job handler needs, wired up once at startup.
///
/// The detector session is created here so the model is loaded
/// exactly once; a missing model file is fatal.
pub struct ProcessingContext {
    pub config: WorkerConfig,
    pub store: Arc<dyn RecordStore>,
    pub blobs: BlobStore,
    pub detector: Arc<ObjectDetector>,
}

impl ProcessingContext {
    /// Create a new processing context.
    pub async fn new(config: WorkerConfig, store: Arc<dyn RecordStore>) -> WorkerResult<Self> {
        let blobs = BlobStore::from_env().await?;

        let detector_config = ObjectDetectorConfig {
            model_path: config.model_path.clone(),
            ..ObjectDetectorConfig::default()
        };
        let detector = Arc::new(ObjectDetector::new(detector_config)?);

        Ok(Self {
            config,
            store,
            blobs,
            detector,
        })
    }

    /// Per-video scratch directory under the configured work dir.
    pub fn work_dir_for(&self, video_id: &VideoId) -> PathBuf {
        PathBuf::from(&self.config.work_dir).join(video_id.as_str())
    }
}

/// Remove leftover work directories older than `max_age`.
///
/// Crashed jobs leave their scratch directories behind; this sweeps
/// them on a timer. A missing work root is not an error.
pub async fn cleanup_work_dir(work_dir: impl AsRef<Path>, max_age: Duration) -> WorkerResult<u32> {
    let work_dir = work_dir.as_ref();

    let mut entries = match tokio::fs::read_dir(work_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0u32;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to stat work dir entry");
                continue;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|m| m.elapsed().ok())
            .unwrap_or(Duration::ZERO);

        if age < max_age {
            debug!(path = %path.display(), "Keeping recent work dir entry");
            continue;
        }

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };

        match result {
            Ok(()) => {
                info!(path = %path.display(), "Removed stale work dir entry");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale entry"),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cleanup_missing_root_is_ok() {
        let removed = cleanup_work_dir("/tmp/vdet-test-does-not-exist", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_entries() {
        let root = tempfile::tempdir().unwrap();
        let job_dir = root.path().join("video-123");
        tokio::fs::create_dir_all(&job_dir).await.unwrap();

        let removed = cleanup_work_dir(root.path(), Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(removed, 0);
        assert!(job_dir.exists());
    }

    #[tokio::test]
    async fn test_cleanup_removes_old_entries() {
        let root = tempfile::tempdir().unwrap();
        let job_dir = root.path().join("video-456");
        tokio::fs::create_dir_all(&job_dir).await.unwrap();
        tokio::fs::write(job_dir.join("source.mp4"), b"x").await.unwrap();

        // Zero max age makes everything stale
        let removed = cleanup_work_dir(root.path(), Duration::ZERO).await.unwrap();

        assert_eq!(removed, 1);
        assert!(!job_dir.exists());
    }
}
