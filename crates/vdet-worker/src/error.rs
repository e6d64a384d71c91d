//! Worker error types.

use thiserror::Error;

use vdet_media::MediaError;
use vdet_queue::QueueError;
use vdet_storage::StorageError;
use vdet_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model failure: {0}")]
    ModelFailure(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Duplicate execution: {0}")]
    DuplicateExecution(String),

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Media error: {0}")]
    Media(MediaError),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<MediaError> for WorkerError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::ModelNotFound(msg) => Self::ModelFailure(msg),
            MediaError::InferenceFailed(msg) => Self::ModelFailure(msg),
            MediaError::FileNotFound(path) => Self::NotFound(path.display().to_string()),
            MediaError::InvalidVideo(msg) => Self::InvalidInput(msg),
            other => Self::Media(other),
        }
    }
}

impl From<StoreError> for WorkerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} {id}")),
            StoreError::DuplicateExecution(id) => Self::DuplicateExecution(id),
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            other => Self::Store(other),
        }
    }
}

impl From<StorageError> for WorkerError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(key) => Self::NotFound(key),
            other => Self::Storage(other),
        }
    }
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    ///
    /// Retryable errors leave the task running so a redelivery can
    /// pick it up again; everything else finalizes the task as failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkerError::StoreUnavailable(_)
                | WorkerError::Storage(_)
                | WorkerError::Queue(_)
                | WorkerError::Io(_)
        )
    }

    /// Check if the failure is permanent.
    ///
    /// Permanent failures go straight to the dead-letter queue;
    /// retrying them would only burn visibility-timeout cycles against
    /// an already-finalized task.
    pub fn is_permanent_failure(&self) -> bool {
        !self.is_retryable()
    }

    /// Check if this is a duplicate-execution collision.
    pub fn is_duplicate_execution(&self) -> bool {
        matches!(self, WorkerError::DuplicateExecution(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_store_error_classification() {
        let e: WorkerError = StoreError::DuplicateExecution("1-0".to_string()).into();
        assert!(e.is_duplicate_execution());

        let e: WorkerError = StoreError::not_found("video", "abc").into();
        assert!(matches!(e, WorkerError::NotFound(_)));

        let e: WorkerError = StoreError::unavailable("connection reset").into();
        assert!(e.is_retryable());
    }

    #[test]
    fn test_media_error_classification() {
        let e: WorkerError = MediaError::model_not_found("models/yolov8n.onnx").into();
        assert!(matches!(e, WorkerError::ModelFailure(_)));
        assert!(!e.is_retryable());

        let e: WorkerError = MediaError::FileNotFound(PathBuf::from("/tmp/missing.mp4")).into();
        assert!(matches!(e, WorkerError::NotFound(_)));
    }

    #[test]
    fn test_storage_error_retryable() {
        let e: WorkerError = StorageError::upload_failed("timeout").into();
        assert!(e.is_retryable());
        assert!(!WorkerError::job_failed("decode failed").is_retryable());
    }

    #[test]
    fn test_permanent_failures_never_retryable() {
        let permanent = [
            WorkerError::invalid_input("no frame indices"),
            WorkerError::ModelFailure("model rejected input".to_string()),
            WorkerError::DuplicateExecution("1-0".to_string()),
            WorkerError::job_failed("decode failed"),
            WorkerError::NotFound("video abc".to_string()),
        ];
        for e in permanent {
            assert!(e.is_permanent_failure(), "{e} should be permanent");
            assert!(!e.is_retryable());
        }

        let transient: WorkerError = StoreError::unavailable("connection reset").into();
        assert!(!transient.is_permanent_failure());
    }
}
