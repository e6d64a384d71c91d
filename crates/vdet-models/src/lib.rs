//! Shared data models for the vdet pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Videos and probed metadata
//! - Detections and bounding boxes
//! - Processed-frame records
//! - Processing tasks (the job tracker state machine)

pub mod detection;
pub mod frame;
pub mod task;
pub mod video;

// Re-export common types
pub use detection::{BoundingBox, Detection};
pub use frame::ProcessedFrame;
pub use task::{ProcessingTask, TaskId, TaskKind, TaskStatus};
pub use video::{Video, VideoId, VideoMetadata, VideoStatus};
