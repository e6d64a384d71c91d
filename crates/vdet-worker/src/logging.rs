//! Job lifecycle logging.

use tracing::info;

use vdet_models::TaskId;

/// Stamps every lifecycle line of one job with its id and operation
/// label, so a grep for either pulls the whole story.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: &'static str,
}

impl JobLogger {
    pub fn new(job_id: &TaskId, operation: &'static str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job completed: {}", message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_carries_job_identity() {
        let job_id = TaskId::new();
        let logger = JobLogger::new(&job_id, "video_processing");

        assert_eq!(logger.job_id, job_id.to_string());
        assert_eq!(logger.operation, "video_processing");
    }
}
