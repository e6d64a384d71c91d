//! S3/MinIO blob store client.

use std::path::Path;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, error, info};

use crate::error::{StorageError, StorageResult};

/// Default bucket: uploaded sources and metadata blobs.
pub const DEFAULT_BUCKET: &str = "videos";
/// Annotated output videos.
pub const PROCESSED_VIDEOS_BUCKET: &str = "processed-videos";
/// Extracted frame JPEGs.
pub const EXTRACTED_FRAMES_BUCKET: &str = "extracted-frames";
/// Annotated single-frame images.
pub const PROCESSED_IMAGES_BUCKET: &str = "processed-images";
/// Scratch space for intermediate artifacts.
pub const TEMP_BUCKET: &str = "temp";

/// Every bucket the pipeline provisions at startup.
pub const ALL_BUCKETS: &[&str] = &[
    DEFAULT_BUCKET,
    PROCESSED_VIDEOS_BUCKET,
    EXTRACTED_FRAMES_BUCKET,
    PROCESSED_IMAGES_BUCKET,
    TEMP_BUCKET,
];

/// Default presigned URL lifetime.
pub const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);

/// Configuration for the blob store client.
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    /// S3 API endpoint URL (MinIO in dev)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Default bucket for sources and metadata
    pub default_bucket: String,
    /// Region (MinIO accepts any)
    pub region: String,
}

impl BlobStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("MINIO_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("MINIO_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("MINIO_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("MINIO_ACCESS_KEY not set"))?,
            secret_access_key: std::env::var("MINIO_SECRET_KEY")
                .map_err(|_| StorageError::config_error("MINIO_SECRET_KEY not set"))?,
            default_bucket: std::env::var("MINIO_DEFAULT_BUCKET")
                .unwrap_or_else(|_| DEFAULT_BUCKET.to_string()),
            region: std::env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        })
    }
}

/// S3-compatible blob store gateway.
#[derive(Clone)]
pub struct BlobStore {
    client: Client,
    default_bucket: String,
}

impl BlobStore {
    /// Create a new client from configuration.
    pub async fn new(config: BlobStoreConfig) -> StorageResult<Self> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "minio",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        let client = Client::from_conf(sdk_config);

        Ok(Self {
            client,
            default_bucket: config.default_bucket,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        let config = BlobStoreConfig::from_env()?;
        Self::new(config).await
    }

    /// The default bucket name.
    pub fn default_bucket(&self) -> &str {
        &self.default_bucket
    }

    /// Provision every pipeline bucket. Idempotent: buckets that
    /// already exist are fine.
    pub async fn ensure_buckets(&self) -> StorageResult<()> {
        for bucket in ALL_BUCKETS {
            match self.client.create_bucket().bucket(*bucket).send().await {
                Ok(_) => info!(bucket, "Bucket created"),
                Err(e) => {
                    let msg = e.to_string();
                    if msg.contains("BucketAlreadyOwnedByYou") || msg.contains("BucketAlreadyExists")
                    {
                        debug!(bucket, "Bucket already exists");
                    } else {
                        return Err(StorageError::bucket_failed(format!(
                            "create {}: {}",
                            bucket, msg
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Check whether a bucket exists.
    pub async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("NotFound") || msg.contains("NoSuchBucket") {
                    Ok(false)
                } else {
                    Err(StorageError::AwsSdk(msg))
                }
            }
        }
    }

    /// Upload a file.
    ///
    /// When `name` is `None` the key is derived from the file name with
    /// a random suffix before the extension, so repeated uploads of the
    /// same file never collide. Returns the object key.
    pub async fn upload_file(
        &self,
        bucket: &str,
        path: impl AsRef<Path>,
        name: Option<&str>,
    ) -> StorageResult<String> {
        let path = path.as_ref();
        let key = match name {
            Some(name) => name.to_string(),
            None => {
                let filename = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| StorageError::upload_failed("Path has no file name"))?;
                suffixed_key(filename)
            }
        };

        debug!(path = %path.display(), bucket, key, "Uploading file");

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(&key)
            .body(body)
            .content_type(content_type_for(&key))
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!(path = %path.display(), bucket, key, "Uploaded file");
        Ok(key)
    }

    /// Upload bytes under an explicit key.
    pub async fn upload_bytes(&self, bucket: &str, key: &str, data: Vec<u8>) -> StorageResult<()> {
        debug!(bytes = data.len(), bucket, key, "Uploading bytes");

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type_for(key))
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        Ok(())
    }

    /// Download an object as bytes.
    pub async fn download_bytes(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        debug!(bucket, key, "Downloading");

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::not_found(key)
                } else {
                    StorageError::DownloadFailed(e.to_string())
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    /// Download an object to a file.
    ///
    /// Failures are logged and reported as `false` rather than raised,
    /// so callers that treat downloads as best-effort can branch on the
    /// return value.
    pub async fn download_file(&self, bucket: &str, key: &str, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();

        let bytes = match self.download_bytes(bucket, key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(bucket, key, error = %e, "Download failed");
                return false;
            }
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                error!(path = %path.display(), error = %e, "Failed to create directory");
                return false;
            }
        }

        if let Err(e) = tokio::fs::write(path, bytes).await {
            error!(path = %path.display(), error = %e, "Failed to write file");
            return false;
        }

        info!(bucket, key, path = %path.display(), "Downloaded");
        true
    }

    /// Generate a presigned GET URL.
    pub async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    /// Server-side copy between buckets/keys.
    pub async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()> {
        debug!(src_bucket, src_key, dst_bucket, dst_key, "Copying object");

        self.client
            .copy_object()
            .copy_source(format!("{}/{}", src_bucket, src_key))
            .bucket(dst_bucket)
            .key(dst_key)
            .send()
            .await
            .map_err(|e| StorageError::CopyFailed(e.to_string()))?;

        Ok(())
    }

    /// Delete an object.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        debug!(bucket, key, "Deleting");

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        Ok(())
    }

    /// Delete multiple objects.
    pub async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StorageResult<u32> {
        if keys.is_empty() {
            return Ok(0);
        }

        debug!(bucket, count = keys.len(), "Deleting objects");

        let objects: Vec<_> = keys
            .iter()
            .filter_map(|k| {
                aws_sdk_s3::types::ObjectIdentifier::builder()
                    .key(k)
                    .build()
                    .ok()
            })
            .collect();

        let delete = aws_sdk_s3::types::Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        self.client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        info!(bucket, count = keys.len(), "Deleted objects");
        Ok(keys.len() as u32)
    }

    /// List objects under a prefix, following pagination.
    pub async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        debug!(bucket, prefix, "Listing objects");

        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::ListFailed(e.to_string()))?;

            if let Some(ref contents) = response.contents {
                for obj in contents {
                    objects.push(ObjectInfo {
                        key: obj.key.clone().unwrap_or_default(),
                        size: obj.size.unwrap_or(0) as u64,
                        last_modified: obj
                            .last_modified
                            .as_ref()
                            .and_then(|t| t.to_millis().ok())
                            .map(|ms| ms as u64),
                    });
                }
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token;
            } else {
                break;
            }
        }

        Ok(objects)
    }

    /// Total size of all objects in a bucket, in bytes.
    pub async fn bucket_size(&self, bucket: &str) -> StorageResult<u64> {
        let objects = self.list_objects(bucket, "").await?;
        Ok(objects.iter().map(|o| o.size).sum())
    }

    /// Check if an object exists.
    pub async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("NotFound") || msg.contains("NoSuchKey") {
                    Ok(false)
                } else {
                    Err(StorageError::AwsSdk(msg))
                }
            }
        }
    }

    /// Check connectivity by heading the default bucket.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.default_bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("Connectivity check failed: {}", e)))?;
        Ok(())
    }
}

/// Information about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// Object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modified timestamp (milliseconds since epoch)
    pub last_modified: Option<u64>,
}

/// Derive an upload key from a filename: an 8-hex random suffix goes
/// before the extension so the original name stays readable.
pub fn suffixed_key(filename: &str) -> String {
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, suffix, ext),
        _ => format!("{}_{}", filename, suffix),
    }
}

/// Guess a content type from the key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("mp4") => "video/mp4",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixed_key_keeps_extension() {
        let key = suffixed_key("holiday.mp4");
        assert!(key.starts_with("holiday_"));
        assert!(key.ends_with(".mp4"));
        assert_eq!(key.len(), "holiday_".len() + 8 + ".mp4".len());
    }

    #[test]
    fn test_suffixed_key_no_extension() {
        let key = suffixed_key("README");
        assert!(key.starts_with("README_"));
        assert!(!key.contains('.'));
    }

    #[test]
    fn test_suffixed_keys_differ() {
        assert_ne!(suffixed_key("a.mp4"), suffixed_key("a.mp4"));
    }

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(content_type_for("a/b/c.mp4"), "video/mp4");
        assert_eq!(content_type_for("frame_000001.jpg"), "image/jpeg");
        assert_eq!(content_type_for("metadata/v1.json"), "application/json");
        assert_eq!(content_type_for("blob"), "application/octet-stream");
    }

    #[test]
    fn test_bucket_list_covers_pipeline() {
        assert!(ALL_BUCKETS.contains(&PROCESSED_VIDEOS_BUCKET));
        assert!(ALL_BUCKETS.contains(&EXTRACTED_FRAMES_BUCKET));
        assert!(ALL_BUCKETS.contains(&DEFAULT_BUCKET));
    }
}
