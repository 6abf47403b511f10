//! Object-storage capability consumed by the upload coordinator.
//!
//! The coordinator never talks to a concrete client; it holds an
//! `Arc<dyn StorageBackend>` so the S3 backend and the in-memory backend are
//! interchangeable.

use crate::models::multipart::CompletedPartInput;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The object or multipart session does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage rejected the request as malformed (e.g. a bad manifest).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// The storage operation a presigned URL authorizes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresignTarget {
    /// A single-object PUT.
    PutObject { key: String, content_type: String },

    /// One part of an open multipart upload.
    UploadPart {
        key: String,
        upload_id: String,
        part_number: i32,
    },
}

impl PresignTarget {
    pub fn key(&self) -> &str {
        match self {
            Self::PutObject { key, .. } | Self::UploadPart { key, .. } => key,
        }
    }
}

/// Multipart primitives and presigning against a single bucket.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Open a multipart upload and return the backend's upload id.
    async fn create_multipart_upload(&self, key: &str, content_type: &str)
    -> StorageResult<String>;

    /// Produce a time-limited URL authorizing `target`.
    async fn presign(&self, target: PresignTarget, expires_in: Duration) -> StorageResult<String>;

    /// Assemble the final object. `parts` must already be sorted by part number.
    ///
    /// Returns the location of the assembled object.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartInput],
    ) -> StorageResult<String>;

    /// Discard uploaded parts and release the session.
    ///
    /// Returns `NotFound` if the session is unknown or already released.
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()>;

    async fn put_object(&self, key: &str, content_type: &str, body: Bytes) -> StorageResult<()>;

    /// Returns `NotFound` if the object does not exist.
    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    /// Cheap connectivity check used by the readiness probe.
    async fn health_check(&self) -> StorageResult<()>;

    fn backend_name(&self) -> &'static str;
}
