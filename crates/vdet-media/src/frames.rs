//! Frame decode and encode over FFmpeg rawvideo pipes.
//!
//! `FrameSource` streams RGB24 frames from FFmpeg stdout without
//! materializing the whole video; `FrameSink` pipes RGB24 frames back
//! into FFmpeg stdin to produce an H.264 MP4.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use image::{ImageBuffer, Rgb, RgbImage};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use vdet_models::VideoMetadata;

use crate::error::{MediaError, MediaResult};
use crate::probe::probe_video;

/// A single decoded RGB24 frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Zero-based index within the video
    pub index: u64,
    pub width: u32,
    pub height: u32,
    /// Raw RGB bytes, width * height * 3
    pub data: Vec<u8>,
}

impl Frame {
    /// View the raw bytes as an owned `RgbImage`.
    pub fn to_image(&self) -> MediaResult<RgbImage> {
        ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| MediaError::internal("Frame byte length does not match dimensions"))
    }

    /// Rebuild a frame from an annotated image.
    pub fn from_image(index: u64, img: RgbImage) -> Self {
        let (width, height) = (img.width(), img.height());
        Self {
            index,
            width,
            height,
            data: img.into_raw(),
        }
    }
}

/// An ordered stream of decoded frames.
///
/// The pipeline consumes frames through this trait so detection logic
/// does not care where the bytes come from.
#[async_trait]
pub trait FrameStream: Send {
    /// Probed metadata for the underlying video.
    fn stream_metadata(&self) -> &VideoMetadata;

    /// Next frame in index order; `Ok(None)` on clean end of stream.
    async fn next_frame(&mut self) -> MediaResult<Option<Frame>>;
}

/// Lazy frame stream over an FFmpeg rawvideo pipe.
pub struct FrameSource {
    metadata: VideoMetadata,
    reader: BufReader<ChildStdout>,
    child: Child,
    next_index: u64,
    bytes_per_frame: usize,
    done: bool,
}

impl FrameSource {
    /// Open a video file: probe it once, then start the decoder.
    pub async fn open(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let metadata = probe_video(path).await?;
        if metadata.width == 0 || metadata.height == 0 {
            return Err(MediaError::InvalidVideo(format!(
                "Zero-sized video stream: {}x{}",
                metadata.width, metadata.height
            )));
        }
        let bytes_per_frame = (metadata.width * metadata.height * 3) as usize;

        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                MediaError::ffmpeg_failed(format!("Failed to spawn FFmpeg: {}", e), None, None)
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            MediaError::ffmpeg_failed("Failed to capture FFmpeg stdout", None, None)
        })?;

        debug!(
            path = %path.display(),
            frames = metadata.frame_count,
            fps = metadata.fps,
            "Frame source opened"
        );

        Ok(Self {
            metadata,
            reader: BufReader::new(stdout),
            child,
            next_index: 0,
            bytes_per_frame,
            done: false,
        })
    }

    /// Probed metadata for the underlying file.
    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on clean end of stream. A decoder failure or
    /// truncated frame mid-stream is reported once as an error; frames
    /// already yielded remain valid partial results.
    pub async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        if self.done {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.bytes_per_frame];
        let read = read_full(&mut self.reader, &mut buf).await?;

        if read == 0 {
            self.done = true;
            let status = self.child.wait().await?;
            if !status.success() {
                return Err(MediaError::decode_failed(
                    self.next_index,
                    format!("FFmpeg exited with status {:?}", status.code()),
                ));
            }
            return Ok(None);
        }

        if read < self.bytes_per_frame {
            self.done = true;
            let _ = self.child.wait().await;
            return Err(MediaError::decode_failed(
                self.next_index,
                format!(
                    "Truncated frame: expected {} bytes, got {}",
                    self.bytes_per_frame, read
                ),
            ));
        }

        let frame = Frame {
            index: self.next_index,
            width: self.metadata.width,
            height: self.metadata.height,
            data: buf,
        };
        self.next_index += 1;
        Ok(Some(frame))
    }
}

#[async_trait]
impl FrameStream for FrameSource {
    fn stream_metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        FrameSource::next_frame(self).await
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if !self.done {
            // Decoder may still be running if the stream was abandoned
            let _ = self.child.start_kill();
        }
    }
}

/// Decode exactly one frame by index.
///
/// Returns `None` when the index is past the end of the video.
pub async fn decode_frame_at(
    path: impl AsRef<Path>,
    index: u64,
    metadata: &VideoMetadata,
) -> MediaResult<Option<Frame>> {
    let path = path.as_ref();
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

    let bytes_per_frame = (metadata.width * metadata.height * 3) as usize;

    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-i"])
        .arg(path)
        .args([
            "-vf",
            &format!("select=eq(n\\,{})", index),
            "-vsync",
            "0",
            "-frames:v",
            "1",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::ffmpeg_failed(
            format!("Frame seek failed for index {}", index),
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
            output.status.code(),
        ));
    }

    if output.stdout.is_empty() {
        return Ok(None);
    }

    if output.stdout.len() != bytes_per_frame {
        return Err(MediaError::decode_failed(
            index,
            format!(
                "Unexpected frame size: expected {} bytes, got {}",
                bytes_per_frame,
                output.stdout.len()
            ),
        ));
    }

    Ok(Some(Frame {
        index,
        width: metadata.width,
        height: metadata.height,
        data: output.stdout,
    }))
}

/// RGB24-to-MP4 encoder over an FFmpeg stdin pipe.
///
/// Encoder stderr is drained concurrently; a chatty encoder cannot
/// fill the pipe and stall `write_frame`.
pub struct FrameSink {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_drain: JoinHandle<Vec<u8>>,
    bytes_per_frame: usize,
    frames_written: u64,
}

impl FrameSink {
    /// Start an encoder writing to `path` at the given geometry and fps.
    pub async fn create(
        path: impl AsRef<Path>,
        width: u32,
        height: u32,
        fps: f64,
    ) -> MediaResult<Self> {
        let path = path.as_ref();
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let fps = if fps > 0.0 { fps } else { 30.0 };
        let mut child = Command::new("ffmpeg")
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-y",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-video_size",
                &format!("{}x{}", width, height),
                "-framerate",
                &format!("{:.3}", fps),
                "-i",
                "-",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
            ])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                MediaError::ffmpeg_failed(format!("Failed to spawn FFmpeg encoder: {}", e), None, None)
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            MediaError::ffmpeg_failed("Failed to capture FFmpeg stdin", None, None)
        })?;
        let stderr_drain = spawn_reader_drain(child.stderr.take());

        Ok(Self {
            child,
            stdin: Some(stdin),
            stderr_drain,
            bytes_per_frame: (width * height * 3) as usize,
            frames_written: 0,
        })
    }

    /// Write one RGB24 frame to the encoder.
    pub async fn write_frame(&mut self, data: &[u8]) -> MediaResult<()> {
        if data.len() != self.bytes_per_frame {
            return Err(MediaError::internal(format!(
                "Invalid frame length: expected {} bytes, got {}",
                self.bytes_per_frame,
                data.len()
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::internal("Encoder already finished"))?;
        stdin.write_all(data).await?;
        self.frames_written += 1;
        Ok(())
    }

    /// Number of frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Close stdin and wait for the encoder to finish the file.
    pub async fn finish(mut self) -> MediaResult<u64> {
        drop(self.stdin.take());
        let status = self.child.wait().await?;
        let stderr = self.stderr_drain.await.unwrap_or_default();
        if !status.success() {
            return Err(MediaError::ffmpeg_failed(
                "FFmpeg encoder failed",
                Some(String::from_utf8_lossy(&stderr).to_string()),
                status.code(),
            ));
        }
        if self.frames_written == 0 {
            warn!("Encoder finished with no frames written");
        }
        Ok(self.frames_written)
    }
}

/// Drain a child output pipe in the background, keeping the bytes for
/// a post-mortem.
fn spawn_reader_drain<R>(reader: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            if let Err(e) = reader.read_to_end(&mut buf).await {
                warn!(error = %e, "Failed to drain child output");
            }
        }
        buf
    })
}

/// Read until the buffer is full or the stream ends.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_image_round_trip() {
        let frame = Frame {
            index: 7,
            width: 4,
            height: 2,
            data: vec![128; 4 * 2 * 3],
        };
        let img = frame.to_image().unwrap();
        assert_eq!(img.width(), 4);
        assert_eq!(img.height(), 2);

        let back = Frame::from_image(7, img);
        assert_eq!(back.index, 7);
        assert_eq!(back.data.len(), 4 * 2 * 3);
    }

    #[test]
    fn test_frame_image_dimension_mismatch() {
        let frame = Frame {
            index: 0,
            width: 4,
            height: 2,
            data: vec![0; 5],
        };
        assert!(frame.to_image().is_err());
    }

    #[tokio::test]
    async fn test_reader_drain_collects_all_output() {
        let noise = vec![b'x'; 256 * 1024];
        let drained = spawn_reader_drain(Some(std::io::Cursor::new(noise.clone())))
            .await
            .unwrap();
        assert_eq!(drained, noise);

        let empty = spawn_reader_drain(None::<std::io::Cursor<Vec<u8>>>).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_read_full_short_stream() {
        let data = vec![1u8; 10];
        let mut reader = std::io::Cursor::new(data);
        let mut buf = vec![0u8; 16];
        let n = read_full(&mut reader, &mut buf).await.unwrap();
        assert_eq!(n, 10);
    }
}
