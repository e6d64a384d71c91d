//! The frame pipeline: sampled detection, annotated re-encode, JPEG
//! extraction and spot detection on explicit indices.
//!
//! This layer is persistence-free. It yields per-frame results in
//! strictly increasing frame order and leaves writing records to the
//! caller.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use vdet_models::VideoMetadata;

use crate::detector::{Detector, RawDetection};
use crate::error::MediaResult;
use crate::frames::{decode_frame_at, Frame, FrameSink, FrameStream};
use crate::overlay::draw_detections;
use crate::probe::probe_video;

/// Options for a full processing run.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Detect on every n-th frame; 0 is treated as 1
    pub sampling_interval: u32,
    /// Confidence threshold passed to the detector
    pub confidence_threshold: f32,
    /// Where to write the annotated MP4, if requested
    pub annotated_output: Option<PathBuf>,
}

/// Detections for one selected frame.
#[derive(Debug, Clone)]
pub struct FrameDetections {
    pub frame_number: u64,
    pub detections: Vec<RawDetection>,
    /// Wall-clock seconds spent on this frame's inference
    pub elapsed_seconds: f64,
}

/// Result of a processing run, possibly partial.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub metadata: VideoMetadata,
    /// Per-frame results in increasing frame order
    pub frames: Vec<FrameDetections>,
    /// Number of frames the sampling interval selected
    pub total_selected: u64,
    /// Set when decoding or detection failed mid-stream; `frames` then
    /// holds the results gathered before the failure
    pub failure: Option<String>,
}

impl ProcessOutcome {
    pub fn total_detections(&self) -> u64 {
        self.frames.iter().map(|f| f.detections.len() as u64).sum()
    }
}

/// Result of spot detection on explicit indices.
#[derive(Debug)]
pub struct SpotOutcome {
    pub metadata: VideoMetadata,
    pub frames: Vec<FrameDetections>,
    /// Indices that were out of range and skipped
    pub skipped: Vec<u64>,
    /// Set when a decode or detection failed mid-run; `frames` then
    /// holds the results gathered before the failure
    pub failure: Option<String>,
}

/// Whether frame `index` is selected at the given sampling interval.
pub fn is_selected(index: u64, interval: u32) -> bool {
    let interval = interval.max(1) as u64;
    index % interval == 0
}

/// All selected indices for a video of `frame_count` frames.
pub fn selected_indices(frame_count: u64, interval: u32) -> Vec<u64> {
    (0..frame_count).filter(|i| is_selected(*i, interval)).collect()
}

/// Filename for an extracted frame, zero-padded to six digits.
pub fn frame_filename(index: u64) -> String {
    format!("frame_{:06}.jpg", index)
}

/// Run detection over a frame stream.
///
/// Selected frames (every n-th) go through the detector; when an
/// annotated output is requested, every frame is re-encoded and
/// selected frames carry overlay boxes and labels. Progress is
/// `processed / total_selected` in percent, reported monotonically and
/// landing on 100 when the stream completes.
///
/// A decode or detection failure mid-stream does not discard work: the
/// outcome carries the frames processed so far plus the failure
/// message.
pub async fn process<S: FrameStream>(
    source: &mut S,
    detector: &impl Detector,
    options: &ProcessOptions,
    mut on_progress: impl FnMut(u8),
) -> MediaResult<ProcessOutcome> {
    let metadata = source.stream_metadata().clone();
    let interval = options.sampling_interval.max(1);
    let total_selected = selected_indices(metadata.frame_count, interval).len() as u64;

    let mut sink = match &options.annotated_output {
        Some(path) => Some(
            FrameSink::create(path, metadata.width, metadata.height, metadata.fps).await?,
        ),
        None => None,
    };

    let mut frames: Vec<FrameDetections> = Vec::new();
    let mut failure = None;
    let mut last_progress = 0u8;

    loop {
        let frame = match source.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, processed = frames.len(), "Decode failed mid-stream, keeping partial results");
                failure = Some(e.to_string());
                break;
            }
        };

        if is_selected(frame.index, interval) {
            let started = Instant::now();
            let detections = match detector.detect(&frame, options.confidence_threshold) {
                Ok(detections) => detections,
                Err(e) => {
                    warn!(frame = frame.index, error = %e, processed = frames.len(), "Detection failed mid-stream, keeping partial results");
                    failure = Some(e.to_string());
                    break;
                }
            };
            let elapsed_seconds = started.elapsed().as_secs_f64();

            debug!(
                frame = frame.index,
                detections = detections.len(),
                "Frame processed"
            );

            if let Some(sink) = sink.as_mut() {
                let mut img = frame.to_image()?;
                draw_detections(&mut img, &detections);
                sink.write_frame(Frame::from_image(frame.index, img).data.as_slice())
                    .await?;
            }

            frames.push(FrameDetections {
                frame_number: frame.index,
                detections,
                elapsed_seconds,
            });

            if total_selected > 0 {
                let pct = (frames.len() as u64 * 100 / total_selected).min(100) as u8;
                if pct > last_progress {
                    last_progress = pct;
                    on_progress(pct);
                }
            }
        } else if let Some(sink) = sink.as_mut() {
            sink.write_frame(&frame.data).await?;
        }
    }

    if let Some(sink) = sink.take() {
        if failure.is_none() {
            sink.finish().await?;
        }
        // On failure the sink is dropped; the partial file is the
        // caller's to discard
    }

    if failure.is_none() && last_progress < 100 {
        on_progress(100);
    }

    info!(
        frames = frames.len(),
        total_selected,
        detections = frames.iter().map(|f| f.detections.len()).sum::<usize>(),
        partial = failure.is_some(),
        "Processing run finished"
    );

    Ok(ProcessOutcome {
        metadata,
        frames,
        total_selected,
        failure,
    })
}

/// Extract every n-th frame as a JPEG named `frame_{index:06}.jpg`.
///
/// Returns the written paths in increasing frame order.
pub async fn extract_frames<S: FrameStream>(
    source: &mut S,
    interval: u32,
    out_dir: impl AsRef<Path>,
) -> MediaResult<Vec<PathBuf>> {
    let out_dir = out_dir.as_ref();
    tokio::fs::create_dir_all(out_dir).await?;

    let interval = interval.max(1);
    let mut written = Vec::new();

    while let Some(frame) = source.next_frame().await? {
        if !is_selected(frame.index, interval) {
            continue;
        }
        let path = out_dir.join(frame_filename(frame.index));
        let img = frame.to_image()?;
        img.save(&path)?;
        written.push(path);
    }

    info!(count = written.len(), dir = %out_dir.display(), "Frames extracted");
    Ok(written)
}

/// Detect on an explicit list of frame indices.
///
/// Indices beyond the end of the video are skipped with a warning and
/// reported in the outcome; the call itself still completes. A decode
/// or detection failure mid-run keeps the results gathered so far.
pub async fn spot_detect(
    path: impl AsRef<Path>,
    indices: &[u64],
    detector: &impl Detector,
    threshold: f32,
    on_progress: impl FnMut(u8),
) -> MediaResult<SpotOutcome> {
    let path = path.as_ref();
    let metadata = probe_video(path).await?;
    spot_detect_frames(
        &metadata,
        indices,
        detector,
        threshold,
        |index| decode_frame_at(path, index, &metadata),
        on_progress,
    )
    .await
}

/// Spot detection over an arbitrary frame fetcher.
async fn spot_detect_frames<Fut>(
    metadata: &VideoMetadata,
    indices: &[u64],
    detector: &impl Detector,
    threshold: f32,
    mut fetch: impl FnMut(u64) -> Fut,
    mut on_progress: impl FnMut(u8),
) -> MediaResult<SpotOutcome>
where
    Fut: std::future::Future<Output = MediaResult<Option<Frame>>>,
{
    let mut sorted: Vec<u64> = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let total = sorted.len() as u64;
    let mut frames = Vec::new();
    let mut skipped = Vec::new();
    let mut failure = None;

    for (done, &index) in sorted.iter().enumerate() {
        let frame = match fetch(index).await {
            Ok(Some(frame)) => Some(frame),
            Ok(None) => {
                warn!(
                    index,
                    frame_count = metadata.frame_count,
                    "Requested frame index is out of range, skipping"
                );
                skipped.push(index);
                None
            }
            Err(e) => {
                warn!(index, error = %e, processed = frames.len(), "Decode failed mid-run, keeping partial results");
                failure = Some(e.to_string());
                break;
            }
        };

        if let Some(frame) = frame {
            let started = Instant::now();
            match detector.detect(&frame, threshold) {
                Ok(detections) => frames.push(FrameDetections {
                    frame_number: index,
                    detections,
                    elapsed_seconds: started.elapsed().as_secs_f64(),
                }),
                Err(e) => {
                    warn!(index, error = %e, processed = frames.len(), "Detection failed mid-run, keeping partial results");
                    failure = Some(e.to_string());
                    break;
                }
            }
        }

        if total > 0 {
            on_progress(((done as u64 + 1) * 100 / total).min(100) as u8);
        }
    }

    if total == 0 {
        on_progress(100);
    }

    Ok(SpotOutcome {
        metadata: metadata.clone(),
        frames,
        skipped,
        failure,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use vdet_models::BoundingBox;

    struct StubStream {
        metadata: VideoMetadata,
        frames: VecDeque<MediaResult<Option<Frame>>>,
    }

    impl StubStream {
        fn new(frame_count: u64, frames: Vec<MediaResult<Option<Frame>>>) -> Self {
            Self {
                metadata: VideoMetadata::new(30.0, frame_count, 2, 2, "rawvideo"),
                frames: frames.into(),
            }
        }
    }

    #[async_trait]
    impl FrameStream for StubStream {
        fn stream_metadata(&self) -> &VideoMetadata {
            &self.metadata
        }

        async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
            self.frames.pop_front().unwrap_or(Ok(None))
        }
    }

    /// Fails every detect call past the first `good` frames.
    struct FlakyDetector {
        good: std::sync::atomic::AtomicUsize,
    }

    impl FlakyDetector {
        fn failing_after(good: usize) -> Self {
            Self {
                good: std::sync::atomic::AtomicUsize::new(good),
            }
        }
    }

    impl Detector for FlakyDetector {
        fn detect(&self, frame: &Frame, _threshold: f32) -> MediaResult<Vec<RawDetection>> {
            use std::sync::atomic::Ordering;
            if self.good.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |g| g.checked_sub(1)).is_err() {
                return Err(MediaError::inference_failed(format!(
                    "model rejected frame {}",
                    frame.index
                )));
            }
            Ok(vec![RawDetection {
                class_id: 0,
                class_name: "person",
                confidence: 0.9,
                bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            }])
        }
    }

    fn frame(index: u64) -> Frame {
        Frame {
            index,
            width: 2,
            height: 2,
            data: vec![0; 12],
        }
    }

    #[test]
    fn test_selection_rule() {
        assert!(is_selected(0, 30));
        assert!(is_selected(30, 30));
        assert!(!is_selected(31, 30));
        assert!(is_selected(5, 1));
    }

    #[test]
    fn test_selected_indices_300_at_30() {
        let indices = selected_indices(300, 30);
        let expected: Vec<u64> = (0..10).map(|i| i * 30).collect();
        assert_eq!(indices, expected);
        assert_eq!(*indices.last().unwrap(), 270);
    }

    #[test]
    fn test_interval_zero_selects_every_frame() {
        assert_eq!(selected_indices(5, 0), vec![0, 1, 2, 3, 4]);
        assert_eq!(selected_indices(5, 1), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_frame_filename_padding() {
        assert_eq!(frame_filename(0), "frame_000000.jpg");
        assert_eq!(frame_filename(4), "frame_000004.jpg");
        assert_eq!(frame_filename(123456), "frame_123456.jpg");
    }

    #[test]
    fn test_selection_count_matches_ceil_division() {
        // |{i : i % k == 0, i < n}| == ceil(n / k)
        for (n, k) in [(300u64, 30u32), (301, 30), (10, 3), (1, 7), (0, 5)] {
            let expected = ((n + k as u64 - 1) / k as u64) as usize;
            assert_eq!(selected_indices(n, k).len(), expected);
        }
    }

    #[tokio::test]
    async fn test_process_keeps_partials_on_detection_error() {
        let mut source = StubStream::new(
            4,
            (0..4).map(|i| Ok(Some(frame(i)))).collect(),
        );
        let detector = FlakyDetector::failing_after(2);
        let options = ProcessOptions {
            sampling_interval: 1,
            confidence_threshold: 0.25,
            annotated_output: None,
        };

        let outcome = process(&mut source, &detector, &options, |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.frames.len(), 2);
        assert_eq!(outcome.total_detections(), 2);
        let failure = outcome.failure.expect("failure recorded");
        assert!(failure.contains("frame 2"));
    }

    #[tokio::test]
    async fn test_process_keeps_partials_on_decode_error() {
        let mut source = StubStream::new(
            4,
            vec![
                Ok(Some(frame(0))),
                Ok(Some(frame(1))),
                Err(MediaError::decode_failed(2, "truncated frame")),
            ],
        );
        let detector = FlakyDetector::failing_after(usize::MAX);
        let options = ProcessOptions {
            sampling_interval: 1,
            confidence_threshold: 0.25,
            annotated_output: None,
        };

        let outcome = process(&mut source, &detector, &options, |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.frames.len(), 2);
        assert!(outcome.failure.is_some());
    }

    #[tokio::test]
    async fn test_spot_detect_keeps_partials_on_failure() {
        let metadata = VideoMetadata::new(30.0, 10, 2, 2, "rawvideo");
        let detector = FlakyDetector::failing_after(1);

        let outcome = spot_detect_frames(
            &metadata,
            &[0, 3, 7],
            &detector,
            0.25,
            |index| async move { Ok(Some(frame(index))) },
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(outcome.frames[0].frame_number, 0);
        assert!(outcome.failure.is_some());
    }

    #[tokio::test]
    async fn test_spot_detect_skips_out_of_range_and_completes() {
        let metadata = VideoMetadata::new(30.0, 10, 2, 2, "rawvideo");
        let detector = FlakyDetector::failing_after(usize::MAX);

        let outcome = spot_detect_frames(
            &metadata,
            &[0, 999_999],
            &detector,
            0.25,
            |index| async move {
                if index < 10 {
                    Ok(Some(frame(index)))
                } else {
                    Ok(None)
                }
            },
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(outcome.skipped, vec![999_999]);
        assert!(outcome.failure.is_none());
    }
}
