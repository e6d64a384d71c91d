//! Job handlers.
//!
//! One parameterized entry point (`run_job`) creates the tracker row,
//! dispatches on job kind, and finalizes the task. Handlers return a
//! JSON summary that becomes the task's result payload.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use vdet_media::{
    extract_frames, process, spot_detect, FrameDetections, FrameSource, ProcessOptions,
};
use vdet_models::{Detection, ProcessedFrame, ProcessingTask, TaskId, TaskKind, Video, VideoId};
use vdet_queue::{DetectObjectsJob, ExtractFramesJob, ProcessVideoJob, QueueJob};
use vdet_storage::{EXTRACTED_FRAMES_BUCKET, PROCESSED_VIDEOS_BUCKET};
use vdet_store::{RecordStore, StoreError};

use crate::context::ProcessingContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

/// Run a consumed job end to end.
///
/// The stream message id doubles as the execution id. A collision with
/// an already-finished execution is not an error; the job is simply
/// skipped so the caller can ack it.
pub async fn run_job(
    ctx: &Arc<ProcessingContext>,
    execution_id: &str,
    job: &QueueJob,
) -> WorkerResult<()> {
    let task_id = match begin_task(
        &ctx.store,
        execution_id,
        job.kind(),
        Some(job.video_id().clone()),
    )
    .await?
    {
        Some(id) => id,
        None => {
            info!(execution_id, "Execution already handled, skipping");
            return Ok(());
        }
    };

    let result = match job {
        QueueJob::ProcessVideo(j) => run_video_processing(ctx, &task_id, j).await,
        QueueJob::DetectObjects(j) => run_object_detection(ctx, &task_id, j).await,
        QueueJob::ExtractFrames(j) => run_frame_extraction(ctx, &task_id, j).await,
    };

    finalize_job(&ctx.store, &task_id, job, result).await
}

/// Finalize the tracker row from a handler's result.
///
/// Retryable errors leave the task running for redelivery. Everything
/// else fails the task, and for video jobs the video row too; rows the
/// handler persisted before the failure are left in place.
pub(crate) async fn finalize_job(
    store: &Arc<dyn RecordStore>,
    task_id: &TaskId,
    job: &QueueJob,
    result: WorkerResult<serde_json::Value>,
) -> WorkerResult<()> {
    match result {
        Ok(summary) => {
            store.complete_task(task_id, summary).await?;
            Ok(())
        }
        Err(e) if e.is_retryable() => {
            // Leave the task running; a redelivery resumes it
            warn!(task_id = %task_id, error = %e, "Transient failure, leaving task open for retry");
            Err(e)
        }
        Err(e) => {
            let msg = e.to_string();
            if let Err(fail_err) = store.fail_task(task_id, &msg).await {
                error!(task_id = %task_id, error = %fail_err, "Failed to record task failure");
            }
            if matches!(job, QueueJob::ProcessVideo(_)) {
                if let Err(fail_err) = store.fail_video(job.video_id(), &msg).await {
                    error!(video_id = %job.video_id(), error = %fail_err, "Failed to record video failure");
                }
            }
            Err(e)
        }
    }
}

/// Claim a tracker row for this execution.
///
/// Returns `None` when the execution is already terminal (skip and
/// ack). A non-terminal row from a crashed or interrupted run is
/// resumed under its existing task id.
pub(crate) async fn begin_task(
    store: &Arc<dyn RecordStore>,
    execution_id: &str,
    kind: TaskKind,
    video_id: Option<VideoId>,
) -> WorkerResult<Option<TaskId>> {
    if let Some(existing) = store.get_task_by_execution(execution_id).await? {
        if existing.status.is_terminal() {
            return Ok(None);
        }
        warn!(execution_id, task_id = %existing.id, "Resuming interrupted execution");
        return Ok(Some(existing.id));
    }

    let task = ProcessingTask::new_running(execution_id, kind, video_id);
    let task_id = task.id.clone();
    match store.create_task(task).await {
        Ok(()) => Ok(Some(task_id)),
        // Lost a race with another consumer of the same delivery
        Err(StoreError::DuplicateExecution(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Full pipeline: decode, detect on sampled frames, persist, and
/// optionally render the annotated output video.
async fn run_video_processing(
    ctx: &Arc<ProcessingContext>,
    task_id: &TaskId,
    job: &ProcessVideoJob,
) -> WorkerResult<serde_json::Value> {
    let logger = JobLogger::new(&job.job_id, "video_processing");
    logger.log_start("Starting video processing");
    let job_started = std::time::Instant::now();

    let video = ctx.store.get_video(&job.video_id).await?;
    ctx.store.mark_video_processing(&job.video_id).await?;

    let work_dir = ctx.work_dir_for(&job.video_id);
    tokio::fs::create_dir_all(&work_dir).await?;

    let local = fetch_source(ctx, &video, &work_dir).await?;
    let mut source = FrameSource::open(&local).await?;

    let metadata = source.metadata().clone();
    ctx.store
        .set_video_metadata(&job.video_id, metadata.clone())
        .await?;
    ctx.blobs.put_metadata(&job.video_id, &metadata).await?;
    logger.log_progress(&format!(
        "Probed {}x{} @ {:.2} fps, {} frames",
        metadata.width, metadata.height, metadata.fps, metadata.frame_count
    ));

    let annotated_path = job.annotate.then(|| work_dir.join("annotated.mp4"));
    let options = ProcessOptions {
        sampling_interval: job.sampling_interval,
        confidence_threshold: job
            .confidence_threshold
            .unwrap_or(ctx.config.confidence_threshold),
        annotated_output: annotated_path.clone(),
    };

    let (progress_tx, progress_handle) =
        spawn_progress_writer(Arc::clone(&ctx.store), task_id.clone());
    let outcome = process(&mut source, ctx.detector.as_ref(), &options, |pct| {
        progress_tx.send(pct).ok();
    })
    .await;
    drop(progress_tx);
    progress_handle.await.ok();
    let outcome = outcome?;

    // Partial results survive a mid-stream decode or detection failure
    let detections_written = persist_frames(&ctx.store, &job.video_id, &outcome.frames).await?;

    if let Some(failure) = &outcome.failure {
        remove_work_dir(&work_dir).await;
        return Err(WorkerError::job_failed(format!(
            "Processing stopped after {} frames: {failure}",
            outcome.frames.len()
        )));
    }

    let processed_key = match annotated_path {
        Some(path) => {
            let key = format!("{}/annotated.mp4", job.video_id);
            ctx.blobs
                .upload_file(PROCESSED_VIDEOS_BUCKET, &path, Some(&key))
                .await?
        }
        // No annotated render; the source object stands in
        None => video.upload_key.clone(),
    };
    ctx.store
        .complete_video(&job.video_id, &processed_key)
        .await?;

    remove_work_dir(&work_dir).await;

    logger.log_completion(&format!(
        "{} frames, {} detections",
        outcome.frames.len(),
        detections_written
    ));

    Ok(json!({
        "video_id": job.video_id,
        "frames_processed": outcome.frames.len(),
        "total_selected": outcome.total_selected,
        "detections": detections_written,
        "processed_key": processed_key,
        "elapsed_seconds": job_started.elapsed().as_secs_f64(),
    }))
}

/// Detect on an explicit list of frame indices.
async fn run_object_detection(
    ctx: &Arc<ProcessingContext>,
    task_id: &TaskId,
    job: &DetectObjectsJob,
) -> WorkerResult<serde_json::Value> {
    let logger = JobLogger::new(&job.job_id, "object_detection");
    logger.log_start(&format!("Spot detection on {} frames", job.frame_indices.len()));
    let job_started = std::time::Instant::now();

    if job.frame_indices.is_empty() {
        return Err(WorkerError::invalid_input("No frame indices requested"));
    }

    let video = ctx.store.get_video(&job.video_id).await?;

    let work_dir = ctx.work_dir_for(&job.video_id);
    tokio::fs::create_dir_all(&work_dir).await?;
    let local = fetch_source(ctx, &video, &work_dir).await?;

    let threshold = job
        .confidence_threshold
        .unwrap_or(ctx.config.confidence_threshold);

    let (progress_tx, progress_handle) = spawn_progress_writer(Arc::clone(&ctx.store), task_id.clone());
    let outcome = spot_detect(
        &local,
        &job.frame_indices,
        ctx.detector.as_ref(),
        threshold,
        |pct| {
            progress_tx.send(pct).ok();
        },
    )
    .await;
    drop(progress_tx);
    progress_handle.await.ok();
    let outcome = outcome?;

    // Partial results survive a mid-run decode or detection failure
    let mut detections_written = 0u64;
    for frame in &outcome.frames {
        let detections = to_detections(&job.video_id, frame);
        detections_written += detections.len() as u64;
        if !detections.is_empty() {
            ctx.store.insert_detections(detections).await?;
        }
    }

    remove_work_dir(&work_dir).await;

    if let Some(failure) = &outcome.failure {
        return Err(WorkerError::job_failed(format!(
            "Detection stopped after {} frames: {failure}",
            outcome.frames.len()
        )));
    }

    logger.log_completion(&format!(
        "{} frames, {} detections, {} skipped",
        outcome.frames.len(),
        detections_written,
        outcome.skipped.len()
    ));

    Ok(json!({
        "video_id": job.video_id,
        "frames_detected": outcome.frames.len(),
        "detections": detections_written,
        "skipped_indices": outcome.skipped,
        "elapsed_seconds": job_started.elapsed().as_secs_f64(),
    }))
}

/// Extract sampled frames as JPEGs and upload them.
async fn run_frame_extraction(
    ctx: &Arc<ProcessingContext>,
    task_id: &TaskId,
    job: &ExtractFramesJob,
) -> WorkerResult<serde_json::Value> {
    let logger = JobLogger::new(&job.job_id, "frame_extraction");
    logger.log_start(&format!("Extracting every {} frames", job.sampling_interval.max(1)));
    let job_started = std::time::Instant::now();

    let video = ctx.store.get_video(&job.video_id).await?;

    let work_dir = ctx.work_dir_for(&job.video_id);
    tokio::fs::create_dir_all(&work_dir).await?;
    let local = fetch_source(ctx, &video, &work_dir).await?;

    let mut source = FrameSource::open(&local).await?;
    let frames_dir = work_dir.join("frames");
    let written = extract_frames(&mut source, job.sampling_interval, &frames_dir).await?;

    let total = written.len();
    let mut keys = Vec::with_capacity(total);
    for (done, path) in written.iter().enumerate() {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| WorkerError::job_failed("Extracted frame path has no file name"))?;
        let key = format!("{}/{}", job.video_id, filename);
        ctx.blobs
            .upload_file(EXTRACTED_FRAMES_BUCKET, path, Some(&key))
            .await?;

        if let Some(index) = parse_frame_index(filename) {
            let row = ProcessedFrame::new(job.video_id.clone(), index, 0).with_frame_key(&key);
            match ctx.store.insert_processed_frame(row).await {
                Ok(()) | Err(StoreError::DuplicateFrame { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        keys.push(key);
        let pct = ((done + 1) * 100 / total) as u8;
        if let Err(e) = ctx.store.set_task_progress(task_id, pct).await {
            warn!(task_id = %task_id, error = %e, "Failed to record progress");
        }
    }

    remove_work_dir(&work_dir).await;

    logger.log_completion(&format!("{} frames uploaded", keys.len()));

    Ok(json!({
        "video_id": job.video_id,
        "frames": keys.len(),
        "keys": keys,
        "elapsed_seconds": job_started.elapsed().as_secs_f64(),
    }))
}

/// Persist one frame's worth of detections plus its processed-frame
/// row, in frame order. Returns the number of detections written.
pub(crate) async fn persist_frames(
    store: &Arc<dyn RecordStore>,
    video_id: &VideoId,
    frames: &[FrameDetections],
) -> WorkerResult<u64> {
    let mut detections_written = 0u64;

    for frame in frames {
        let detections = to_detections(video_id, frame);
        detections_written += detections.len() as u64;
        if !detections.is_empty() {
            store.insert_detections(detections).await?;
        }

        let row = ProcessedFrame::new(
            video_id.clone(),
            frame.frame_number,
            frame.detections.len() as u32,
        )
        .with_processing_time(frame.elapsed_seconds);
        match store.insert_processed_frame(row).await {
            Ok(()) => {}
            Err(StoreError::DuplicateFrame { frame_number, .. }) => {
                warn!(frame = frame_number, "Frame already recorded, skipping row");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(detections_written)
}

fn to_detections(video_id: &VideoId, frame: &FrameDetections) -> Vec<Detection> {
    frame
        .detections
        .iter()
        .map(|d| {
            Detection::new(
                video_id.clone(),
                frame.frame_number,
                d.class_name,
                d.confidence,
                d.bbox,
            )
        })
        .collect()
}

/// Forward pipeline progress callbacks into the record store without
/// blocking the decode loop.
fn spawn_progress_writer(
    store: Arc<dyn RecordStore>,
    task_id: TaskId,
) -> (mpsc::UnboundedSender<u8>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
    let handle = tokio::spawn(async move {
        while let Some(pct) = rx.recv().await {
            if let Err(e) = store.set_task_progress(&task_id, pct).await {
                warn!(task_id = %task_id, error = %e, "Failed to record progress");
            }
        }
    });
    (tx, handle)
}

/// Download the video's source object into the work directory.
async fn fetch_source(
    ctx: &Arc<ProcessingContext>,
    video: &Video,
    work_dir: &Path,
) -> WorkerResult<PathBuf> {
    let extension = Path::new(&video.original_filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4");
    let local = work_dir.join(format!("source.{extension}"));

    let bytes = ctx
        .blobs
        .download_bytes(ctx.blobs.default_bucket(), &video.upload_key)
        .await?;
    tokio::fs::write(&local, &bytes).await?;

    info!(
        key = %video.upload_key,
        bytes = bytes.len(),
        path = %local.display(),
        "Downloaded source video"
    );
    Ok(local)
}

/// Parse the frame index out of a `frame_{index:06}.jpg` file name.
fn parse_frame_index(filename: &str) -> Option<u64> {
    filename
        .strip_prefix("frame_")?
        .strip_suffix(".jpg")?
        .parse()
        .ok()
}

async fn remove_work_dir(work_dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(work_dir).await {
        warn!(path = %work_dir.display(), error = %e, "Failed to remove work dir");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdet_media::RawDetection;
    use vdet_models::{BoundingBox, TaskStatus};
    use vdet_store::MemoryStore;

    fn store() -> Arc<dyn RecordStore> {
        Arc::new(MemoryStore::new())
    }

    fn raw(class_name: &'static str, confidence: f32) -> RawDetection {
        RawDetection {
            class_id: 0,
            class_name,
            confidence,
            bbox: BoundingBox::new(10.0, 10.0, 50.0, 80.0),
        }
    }

    #[tokio::test]
    async fn test_begin_task_creates_running_row() {
        let store = store();
        let task_id = begin_task(&store, "1-0", TaskKind::VideoProcessing, None)
            .await
            .unwrap()
            .unwrap();

        let task = store.get_task(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.execution_id, "1-0");
    }

    #[tokio::test]
    async fn test_begin_task_skips_finished_execution() {
        let store = store();
        let task_id = begin_task(&store, "1-0", TaskKind::ObjectDetection, None)
            .await
            .unwrap()
            .unwrap();
        store
            .complete_task(&task_id, serde_json::json!({"ok": true}))
            .await
            .unwrap();

        let resumed = begin_task(&store, "1-0", TaskKind::ObjectDetection, None)
            .await
            .unwrap();
        assert!(resumed.is_none());
    }

    #[tokio::test]
    async fn test_begin_task_resumes_open_execution() {
        let store = store();
        let first = begin_task(&store, "2-0", TaskKind::FrameExtraction, None)
            .await
            .unwrap()
            .unwrap();

        let second = begin_task(&store, "2-0", TaskKind::FrameExtraction, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_persist_frames_writes_rows_in_order() {
        let store = store();
        let video_id = VideoId::new();
        let frames = vec![
            FrameDetections {
                frame_number: 0,
                detections: vec![raw("person", 0.9), raw("dog", 0.6)],
                elapsed_seconds: 0.01,
            },
            FrameDetections {
                frame_number: 30,
                detections: vec![],
                elapsed_seconds: 0.01,
            },
            FrameDetections {
                frame_number: 60,
                detections: vec![raw("car", 0.8)],
                elapsed_seconds: 0.01,
            },
        ];

        let written = persist_frames(&store, &video_id, &frames).await.unwrap();
        assert_eq!(written, 3);

        let rows = store.list_processed_frames(&video_id).await.unwrap();
        let numbers: Vec<u64> = rows.iter().map(|r| r.frame_number).collect();
        assert_eq!(numbers, vec![0, 30, 60]);
        assert_eq!(rows[0].detection_count, 2);
        assert_eq!(rows[1].detection_count, 0);
        assert!((rows[0].processing_time - 0.01).abs() < f64::EPSILON);

        assert_eq!(store.count_detections(&video_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_persist_frames_tolerates_existing_row() {
        let store = store();
        let video_id = VideoId::new();
        let frames = vec![FrameDetections {
            frame_number: 0,
            detections: vec![raw("person", 0.9)],
            elapsed_seconds: 0.01,
        }];

        persist_frames(&store, &video_id, &frames).await.unwrap();
        // A resumed execution re-persists the same frame
        persist_frames(&store, &video_id, &frames).await.unwrap();

        let rows = store.list_processed_frames(&video_id).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_job_keeps_persisted_rows_and_fails_video() {
        let store = store();
        let video = Video::new("Test", "t.mp4", "uploads/t.mp4");
        let video_id = video.id.clone();
        store.create_video(video).await.unwrap();
        store.mark_video_processing(&video_id).await.unwrap();

        let job = QueueJob::ProcessVideo(ProcessVideoJob::new(video_id.clone(), 30));
        let task_id = begin_task(&store, "3-0", job.kind(), Some(video_id.clone()))
            .await
            .unwrap()
            .unwrap();

        // Three frames made it through before the stream died
        let frames: Vec<FrameDetections> = (0..3)
            .map(|i| FrameDetections {
                frame_number: i * 30,
                detections: vec![raw("person", 0.9)],
                elapsed_seconds: 0.01,
            })
            .collect();
        persist_frames(&store, &video_id, &frames).await.unwrap();

        let err = finalize_job(
            &store,
            &task_id,
            &job,
            Err(WorkerError::job_failed(
                "Processing stopped after 3 frames: truncated frame",
            )),
        )
        .await
        .unwrap_err();
        assert!(!err.is_retryable());

        let task = store.get_task(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(!task.error_message.as_deref().unwrap_or("").is_empty());

        let video = store.get_video(&video_id).await.unwrap();
        assert_eq!(video.status, vdet_models::VideoStatus::Failed);
        assert!(video.error_message.is_some());

        let rows = store.list_processed_frames(&video_id).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(store.count_detections(&video_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_leaves_task_open() {
        let store = store();
        let video = Video::new("Test", "t.mp4", "uploads/t.mp4");
        let video_id = video.id.clone();
        store.create_video(video).await.unwrap();

        let job = QueueJob::ProcessVideo(ProcessVideoJob::new(video_id.clone(), 30));
        let task_id = begin_task(&store, "4-0", job.kind(), Some(video_id.clone()))
            .await
            .unwrap()
            .unwrap();

        let err = finalize_job(
            &store,
            &task_id,
            &job,
            Err(vdet_store::StoreError::unavailable("connection reset").into()),
        )
        .await
        .unwrap_err();
        assert!(err.is_retryable());

        // Still running, so the redelivery can resume it
        let task = store.get_task(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        let video = store.get_video(&video_id).await.unwrap();
        assert_ne!(video.status, vdet_models::VideoStatus::Failed);
    }

    #[test]
    fn test_parse_frame_index() {
        assert_eq!(parse_frame_index("frame_000000.jpg"), Some(0));
        assert_eq!(parse_frame_index("frame_000150.jpg"), Some(150));
        assert_eq!(parse_frame_index("thumbnail.jpg"), None);
    }
}
