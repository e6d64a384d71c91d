//! Metadata blob operations.
//!
//! Probed metadata lives as JSON at `metadata/{video_id}.json` in the
//! default bucket. Uploads stage through a named temp file that is
//! removed on every exit path (the file guard drops with the scope).

use std::io::Write;

use tempfile::NamedTempFile;
use tracing::info;

use vdet_models::{VideoId, VideoMetadata};

use crate::client::BlobStore;
use crate::error::{StorageError, StorageResult};

/// Blob key for a video's metadata document.
pub fn metadata_key(video_id: &VideoId) -> String {
    format!("metadata/{}.json", video_id)
}

impl BlobStore {
    /// Serialize metadata to a temp file and upload it.
    pub async fn put_metadata(
        &self,
        video_id: &VideoId,
        metadata: &VideoMetadata,
    ) -> StorageResult<String> {
        let key = metadata_key(video_id);

        let mut tmp = NamedTempFile::new()?;
        serde_json::to_writer_pretty(&mut tmp, metadata)?;
        tmp.flush()?;

        self.upload_file(self.default_bucket(), tmp.path(), Some(&key))
            .await?;

        info!(video_id = %video_id, key, "Metadata uploaded");
        Ok(key)
    }

    /// Fetch and parse a video's metadata document.
    pub async fn get_metadata(&self, video_id: &VideoId) -> StorageResult<VideoMetadata> {
        let key = metadata_key(video_id);
        let bucket = self.default_bucket().to_string();
        let bytes = self.download_bytes(&bucket, &key).await?;
        serde_json::from_slice(&bytes).map_err(StorageError::Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_key_scheme() {
        let id = VideoId::from("abc-123");
        assert_eq!(metadata_key(&id), "metadata/abc-123.json");
    }

    #[test]
    fn test_metadata_serializes_round_trip() {
        let meta = VideoMetadata::new(30.0, 300, 1920, 1080, "h264");
        let json = serde_json::to_vec(&meta).unwrap();
        let back: VideoMetadata = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, meta);
        assert!((back.duration_seconds - 10.0).abs() < f64::EPSILON);
    }
}
