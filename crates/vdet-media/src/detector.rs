//! Object detection using a YOLOv8 ONNX model.
//!
//! Inference runs through ONNX Runtime with execution provider
//! fallbacks (CUDA when built with the `cuda` feature, CoreML on
//! macOS, CPU everywhere). The model is loaded once per detector and
//! a missing or unreadable model file fails construction, not the
//! first detect call.

use std::path::Path;
use std::sync::Mutex;

use image::{DynamicImage, GenericImageView};
use ndarray::Array;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use vdet_models::BoundingBox;

use crate::error::{MediaError, MediaResult};
use crate::frames::Frame;

/// A detection straight out of the model, in source-pixel units.
#[derive(Debug, Clone)]
pub struct RawDetection {
    /// COCO class ID (0 = person, 2 = car, etc.)
    pub class_id: usize,
    /// Class label from the COCO table
    pub class_name: &'static str,
    /// Detection confidence [0, 1]
    pub confidence: f32,
    /// Box clamped to the frame, width/height >= 0
    pub bbox: BoundingBox,
}

/// COCO class names (80 classes).
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck",
    "boat", "traffic light", "fire hydrant", "stop sign", "parking meter", "bench",
    "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra",
    "giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee",
    "skis", "snowboard", "sports ball", "kite", "baseball bat", "baseball glove",
    "skateboard", "surfboard", "tennis racket", "bottle", "wine glass", "cup",
    "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

/// Configuration for object detection.
#[derive(Debug, Clone)]
pub struct ObjectDetectorConfig {
    /// Path to ONNX model file
    pub model_path: String,
    /// IoU threshold for NMS
    pub nms_threshold: f32,
    /// Input image size (model expects square input)
    pub input_size: u32,
}

impl Default for ObjectDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov8n.onnx".to_string(),
            nms_threshold: 0.45,
            input_size: 640,
        }
    }
}

/// Per-frame detection, however it is implemented.
///
/// The pipeline takes detectors through this trait so tests can
/// substitute a model-free implementation.
pub trait Detector: Sync {
    fn detect(&self, frame: &Frame, threshold: f32) -> MediaResult<Vec<RawDetection>>;
}

/// YOLOv8 object detector.
///
/// Deterministic for a given frame and model weights; safe to share
/// across tasks behind an `Arc` (the session sits behind a lock).
pub struct ObjectDetector {
    session: Mutex<Session>,
    config: ObjectDetectorConfig,
}

impl ObjectDetector {
    /// Create a new object detector from config.
    ///
    /// Returns `ModelNotFound` if the model file doesn't exist and an
    /// inference error if it cannot be loaded.
    pub fn new(config: ObjectDetectorConfig) -> MediaResult<Self> {
        let model_path = Path::new(&config.model_path);
        if !model_path.exists() {
            return Err(MediaError::model_not_found(&config.model_path));
        }

        let session = Mutex::new(create_session(model_path)?);
        info!(
            model_path = %config.model_path,
            input_size = config.input_size,
            "Object detector initialized"
        );

        Ok(Self { session, config })
    }

    /// Detect objects on a decoded frame.
    ///
    /// Detections below `threshold` are dropped before NMS. Boxes come
    /// back in source-pixel units, clamped to the frame.
    pub fn detect(&self, frame: &Frame, threshold: f32) -> MediaResult<Vec<RawDetection>> {
        let img = DynamicImage::ImageRgb8(frame.to_image()?);
        self.detect_image(&img, threshold)
    }

    /// Detect objects on an already-loaded image.
    pub fn detect_image(&self, img: &DynamicImage, threshold: f32) -> MediaResult<Vec<RawDetection>> {
        let (width, height) = img.dimensions();
        let input = self.preprocess(img)?;
        let outputs = self.run_inference(input)?;
        let detections = self.postprocess(&outputs, width, height, threshold)?;

        debug!(count = detections.len(), "Object detection completed");
        Ok(detections)
    }

    /// Preprocess image for YOLOv8 inference.
    ///
    /// - Resize to model input size (640x640)
    /// - Normalize pixel values to [0, 1]
    /// - Convert to NCHW format (batch, channels, height, width)
    fn preprocess(&self, img: &DynamicImage) -> MediaResult<Value> {
        let input_size = self.config.input_size;

        let resized = img.resize_exact(
            input_size,
            input_size,
            image::imageops::FilterType::Triangle,
        );

        let rgb = resized.to_rgb8();
        let (w, h) = (input_size as usize, input_size as usize);

        // HWC -> CHW with normalization to [0, 1]
        let mut chw_data: Vec<f32> = Vec::with_capacity(3 * h * w);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    let pixel = rgb.get_pixel(x as u32, y as u32);
                    chw_data.push(pixel[c] as f32 / 255.0);
                }
            }
        }

        let shape = vec![1usize, 3, h, w];
        Tensor::from_array((shape, chw_data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::inference_failed(format!("Failed to create tensor: {}", e)))
    }

    /// Run ONNX inference.
    fn run_inference(&self, input: Value) -> MediaResult<Vec<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| MediaError::inference_failed(format!("ONNX inference failed: {}", e)))?;

        let output = outputs
            .get("output0")
            .ok_or_else(|| MediaError::inference_failed("Missing output0 tensor"))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::inference_failed(format!("Failed to extract tensor: {}", e)))?;

        Ok(tensor.1.iter().copied().collect())
    }

    /// Postprocess YOLOv8 output.
    ///
    /// YOLOv8 output format: [1, 84, 8400]
    /// - 84 = 4 (bbox: cx, cy, w, h) + 80 (class scores)
    /// - 8400 = number of detection candidates
    fn postprocess(
        &self,
        outputs: &[f32],
        orig_width: u32,
        orig_height: u32,
        threshold: f32,
    ) -> MediaResult<Vec<RawDetection>> {
        let num_classes = 80;
        let num_boxes = 8400;
        let num_features = 84;

        if outputs.len() != num_features * num_boxes {
            return Err(MediaError::inference_failed(format!(
                "Unexpected output size: expected {}, got {}",
                num_features * num_boxes,
                outputs.len()
            )));
        }

        // Output is [1, 84, 8400]; transpose to [8400, 84]
        let output_array = Array::from_shape_vec((num_features, num_boxes), outputs.to_vec())
            .map_err(|e| MediaError::inference_failed(format!("Failed to reshape output: {}", e)))?;
        let transposed = output_array.t();

        let mut candidates: Vec<RawDetection> = Vec::new();
        let input_size = self.config.input_size as f32;
        let scale_w = orig_width as f32 / input_size;
        let scale_h = orig_height as f32 / input_size;

        for i in 0..num_boxes {
            // Center-form box in model coordinates
            let cx = transposed[[i, 0]];
            let cy = transposed[[i, 1]];
            let w = transposed[[i, 2]];
            let h = transposed[[i, 3]];

            let mut best_class = 0;
            let mut best_score = 0.0f32;
            for c in 0..num_classes {
                let score = transposed[[i, 4 + c]];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }

            if best_score < threshold {
                continue;
            }

            // Center form -> corner form in source pixels, clamped to the frame
            let x1 = ((cx - w / 2.0) * scale_w).clamp(0.0, orig_width as f32);
            let y1 = ((cy - h / 2.0) * scale_h).clamp(0.0, orig_height as f32);
            let x2 = ((cx + w / 2.0) * scale_w).clamp(0.0, orig_width as f32);
            let y2 = ((cy + h / 2.0) * scale_h).clamp(0.0, orig_height as f32);

            candidates.push(RawDetection {
                class_id: best_class,
                class_name: COCO_CLASSES[best_class],
                confidence: best_score,
                bbox: BoundingBox::from_corners(x1, y1, x2, y2),
            });
        }

        Ok(non_maximum_suppression(candidates, self.config.nms_threshold))
    }

    /// Get the configuration.
    pub fn config(&self) -> &ObjectDetectorConfig {
        &self.config
    }
}

/// Apply Non-Maximum Suppression to remove overlapping detections.
impl Detector for ObjectDetector {
    fn detect(&self, frame: &Frame, threshold: f32) -> MediaResult<Vec<RawDetection>> {
        ObjectDetector::detect(self, frame, threshold)
    }
}

fn non_maximum_suppression(mut detections: Vec<RawDetection>, nms_threshold: f32) -> Vec<RawDetection> {
    if detections.is_empty() {
        return detections;
    }

    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            // Only suppress same class
            if detections[i].class_id != detections[j].class_id {
                continue;
            }
            if compute_iou(&detections[i].bbox, &detections[j].bbox) > nms_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection over Union (IoU) between two boxes.
fn compute_iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Create ONNX Runtime session with automatic execution provider selection.
fn create_session(model_path: &Path) -> MediaResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| MediaError::inference_failed(format!("Failed to read model file: {}", e)))?;

    let mut builder = Session::builder()
        .map_err(|e| MediaError::inference_failed(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::inference_failed(format!("Failed to set optimization level: {}", e)))?;

    // Try CUDA on Linux with cuda feature
    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for object detection");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, trying alternatives");
    }

    // Try CoreML on macOS
    #[cfg(target_os = "macos")]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        if let Ok(coreml_builder) = builder
            .clone()
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
        {
            if let Ok(session) = coreml_builder.commit_from_memory(&model_bytes) {
                info!("Using CoreML execution provider for object detection");
                return Ok(session);
            }
        }
        debug!("CoreML execution provider not available, using CPU");
    }

    info!("Using CPU execution provider for object detection");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MediaError::inference_failed(format!("Failed to load ONNX model: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: usize, confidence: f32, x: f32, y: f32, w: f32, h: f32) -> RawDetection {
        RawDetection {
            class_id,
            class_name: COCO_CLASSES[class_id],
            confidence,
            bbox: BoundingBox::new(x, y, w, h),
        }
    }

    #[test]
    fn test_coco_classes() {
        assert_eq!(COCO_CLASSES[0], "person");
        assert_eq!(COCO_CLASSES[2], "car");
        assert_eq!(COCO_CLASSES.len(), 80);
    }

    #[test]
    fn test_config_default() {
        let config = ObjectDetectorConfig::default();
        assert_eq!(config.input_size, 640);
        assert!((config.nms_threshold - 0.45).abs() < 0.001);
    }

    #[test]
    fn test_iou_identical_boxes() {
        let a = BoundingBox::new(10.0, 10.0, 20.0, 20.0);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_iou_disjoint_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(100.0, 100.0, 10.0, 10.0);
        assert_eq!(compute_iou(&a, &b), 0.0);
    }

    #[test]
    fn test_nms_suppresses_overlap_same_class() {
        let dets = vec![
            det(0, 0.9, 10.0, 10.0, 50.0, 50.0),
            det(0, 0.8, 12.0, 12.0, 50.0, 50.0),
            det(0, 0.7, 200.0, 200.0, 40.0, 40.0),
        ];
        let kept = non_maximum_suppression(dets, 0.45);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 0.001);
    }

    #[test]
    fn test_nms_keeps_overlap_across_classes() {
        let dets = vec![
            det(0, 0.9, 10.0, 10.0, 50.0, 50.0),
            det(2, 0.8, 10.0, 10.0, 50.0, 50.0),
        ];
        let kept = non_maximum_suppression(dets, 0.45);
        assert_eq!(kept.len(), 2);
    }
}
