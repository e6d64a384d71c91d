//! S3/MinIO blob store gateway.
//!
//! This crate provides:
//! - The `BlobStore` client (uploads, downloads, presigning, listing)
//! - Idempotent bucket provisioning for the pipeline buckets
//! - Metadata blob staging under `metadata/{video_id}.json`

pub mod client;
pub mod error;
pub mod metadata;

pub use client::{
    content_type_for, suffixed_key, BlobStore, BlobStoreConfig, ObjectInfo, ALL_BUCKETS,
    DEFAULT_BUCKET, DEFAULT_PRESIGN_EXPIRY, EXTRACTED_FRAMES_BUCKET, PROCESSED_IMAGES_BUCKET,
    PROCESSED_VIDEOS_BUCKET, TEMP_BUCKET,
};
pub use error::{StorageError, StorageResult};
pub use metadata::metadata_key;
