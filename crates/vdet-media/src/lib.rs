//! FFmpeg frame pipeline and ONNX object detection.
//!
//! This crate provides:
//! - Video probing via ffprobe
//! - Lazy frame decode/encode over rawvideo pipes
//! - YOLOv8 object detection through ONNX Runtime
//! - Overlay rendering for annotated output
//! - The sampled/spot/extract frame pipeline

pub mod detector;
pub mod error;
pub mod frames;
pub mod overlay;
pub mod pipeline;
pub mod probe;

pub use detector::{Detector, ObjectDetector, ObjectDetectorConfig, RawDetection, COCO_CLASSES};
pub use error::{MediaError, MediaResult};
pub use frames::{decode_frame_at, Frame, FrameSink, FrameSource, FrameStream};
pub use pipeline::{
    extract_frames, frame_filename, is_selected, process, selected_indices, spot_detect,
    FrameDetections, ProcessOptions, ProcessOutcome, SpotOutcome,
};
pub use probe::probe_video;
