//! Video detection worker.
//!
//! This crate provides:
//! - The job executor (queue consumption, retries, DLQ)
//! - Handlers for the three job kinds: full video processing, spot
//!   detection on explicit frame indices, and frame extraction
//! - Worker configuration and structured job logging

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod jobs;
pub mod logging;

pub use config::WorkerConfig;
pub use context::{cleanup_work_dir, ProcessingContext};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use jobs::run_job;
pub use logging::JobLogger;
