//! S3-compatible storage backend using the AWS SDK.

use crate::models::multipart::CompletedPartInput;
use crate::services::storage_backend::{
    PresignTarget, StorageBackend, StorageError, StorageResult,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use bytes::Bytes;
use std::time::Duration;
use tracing::instrument;

/// Connection settings for [`S3Backend`].
#[derive(Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, R2, ...).
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Use `endpoint/bucket/key` addressing instead of virtual-hosted style.
    pub force_path_style: bool,
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("has_static_credentials", &self.access_key_id.is_some())
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

fn map_s3_operation_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::S3(Box::new(err))
}

/// Convert an SDK error to StorageError, mapping 404 responses to NotFound.
fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>, what: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if let aws_sdk_s3::error::SdkError::ServiceError(ref service_err) = err {
        if service_err.raw().status().as_u16() == 404 {
            return StorageError::NotFound(what.to_string());
        }
    }
    map_s3_operation_error(err)
}

/// S3 storage backend bound to one bucket.
pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Build a client from `settings`.
    ///
    /// Static credentials are used when both halves are present; otherwise the
    /// ambient AWS credential chain applies.
    pub async fn new(settings: S3Settings) -> StorageResult<Self> {
        if settings.bucket.trim().is_empty() {
            return Err(StorageError::Config("s3 bucket name is empty".to_string()));
        }
        if settings.access_key_id.is_some() ^ settings.secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);

        if let (Some(key_id), Some(secret)) = (settings.access_key_id, settings.secret_access_key)
        {
            let credentials =
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "upload-config");
            builder = builder.credentials_provider(credentials);
        }

        if let Some(endpoint) = settings.endpoint.as_deref() {
            let lower = endpoint.to_ascii_lowercase();
            let endpoint = if lower.starts_with("http://") || lower.starts_with("https://") {
                endpoint.to_string()
            } else {
                format!("http://{}", endpoint)
            };
            builder = builder.endpoint_url(endpoint);
        }

        if settings.force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket,
        })
    }

    fn presigning_config(expires_in: Duration) -> StorageResult<PresigningConfig> {
        PresigningConfig::expires_in(expires_in)
            .map_err(|err| StorageError::Config(format!("invalid presign expiry: {}", err)))
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::Config("S3 did not return upload_id".to_string()))
    }

    #[instrument(skip(self), fields(backend = "s3", key = %target.key()))]
    async fn presign(&self, target: PresignTarget, expires_in: Duration) -> StorageResult<String> {
        let config = Self::presigning_config(expires_in)?;

        let request = match target {
            PresignTarget::PutObject { key, content_type } => self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_type(content_type)
                .presigned(config)
                .await
                .map_err(map_s3_operation_error)?,
            PresignTarget::UploadPart {
                key,
                upload_id,
                part_number,
            } => self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .presigned(config)
                .await
                .map_err(map_s3_operation_error)?,
        };

        Ok(request.uri().to_string())
    }

    #[instrument(skip(self, parts), fields(backend = "s3", parts = parts.len()))]
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartInput],
    ) -> StorageResult<String> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|part| {
                        CompletedPart::builder()
                            .part_number(part.part_number)
                            .e_tag(&part.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, upload_id))?;

        Ok(output
            .location()
            .map(str::to_string)
            .unwrap_or_else(|| format!("s3://{}/{}", self.bucket, key)))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, upload_id))?;
        Ok(())
    }

    #[instrument(skip(self, body), fields(backend = "s3", size = body.len()))]
    async fn put_object(&self, key: &str, content_type: &str, body: Bytes) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        // delete_object succeeds on missing keys, so probe first to report NotFound
        self.client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, key))?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, &self.bucket))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> S3Settings {
        S3Settings {
            bucket: "recordings".to_string(),
            region: "us-east-2".to_string(),
            endpoint: Some("localhost:9000".to_string()),
            access_key_id: Some("minioadmin".to_string()),
            secret_access_key: Some("minioadmin".to_string()),
            force_path_style: true,
        }
    }

    #[tokio::test]
    async fn rejects_half_configured_credentials() {
        let mut s = settings();
        s.secret_access_key = None;
        let err = S3Backend::new(s).await.unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[tokio::test]
    async fn rejects_empty_bucket() {
        let mut s = settings();
        s.bucket = "  ".to_string();
        assert!(matches!(
            S3Backend::new(s).await,
            Err(StorageError::Config(_))
        ));
    }

    #[tokio::test]
    async fn presigns_part_upload_without_network() {
        let backend = S3Backend::new(settings()).await.unwrap();
        let url = backend
            .presign(
                PresignTarget::UploadPart {
                    key: "videos/a.webm".to_string(),
                    upload_id: "abc".to_string(),
                    part_number: 3,
                },
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        assert!(url.starts_with("http://localhost:9000/recordings/videos/a.webm"));
        assert!(url.contains("partNumber=3"));
        assert!(url.contains("uploadId=abc"));
        assert!(url.contains("X-Amz-Expires=3600"));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let rendered = format!("{:?}", settings());
        assert!(!rendered.contains("minioadmin"));
    }
}
