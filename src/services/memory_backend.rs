//! In-process storage backend.
//!
//! Mirrors the S3 multipart contract closely enough to exercise the
//! coordinator without a network: completions require a known session and an
//! ascending manifest, aborts of unknown sessions report `NotFound`.
//! Presigned URLs use a `memory://` scheme and are not dereferenceable.

use crate::models::multipart::CompletedPartInput;
use crate::services::storage_backend::{
    PresignTarget, StorageBackend, StorageError, StorageResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::sync::Mutex;

/// A stored object.
#[derive(Clone, Debug)]
pub struct StoredObject {
    pub content_type: String,
    pub body: Bytes,
}

/// A manifest the backend accepted, kept for inspection.
#[derive(Clone, Debug)]
pub struct CompletedManifest {
    pub key: String,
    pub upload_id: String,
    pub parts: Vec<CompletedPartInput>,
}

#[derive(Default)]
struct State {
    objects: HashMap<String, StoredObject>,
    /// upload id -> (key, content type)
    sessions: HashMap<String, (String, String)>,
    completed: Vec<CompletedManifest>,
}

#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<State>>,
    next_id: Arc<AtomicU64>,
    fail_deletes: Arc<AtomicBool>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `delete_object` fail with a transport-style error.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.state.lock().await.objects.get(key).cloned()
    }

    pub async fn has_session(&self, upload_id: &str) -> bool {
        self.state.lock().await.sessions.contains_key(upload_id)
    }

    pub async fn completed_manifests(&self) -> Vec<CompletedManifest> {
        self.state.lock().await.completed.clone()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        let upload_id = format!("mem-{:08}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.state.lock().await.sessions.insert(
            upload_id.clone(),
            (key.to_string(), content_type.to_string()),
        );
        Ok(upload_id)
    }

    async fn presign(&self, target: PresignTarget, expires_in: Duration) -> StorageResult<String> {
        let expires = expires_in.as_secs();
        Ok(match target {
            PresignTarget::PutObject { key, content_type } => format!(
                "memory://{}?method=PUT&content-type={}&expires={}",
                key, content_type, expires
            ),
            PresignTarget::UploadPart {
                key,
                upload_id,
                part_number,
            } => format!(
                "memory://{}?uploadId={}&partNumber={}&expires={}",
                key, upload_id, part_number, expires
            ),
        })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartInput],
    ) -> StorageResult<String> {
        let mut state = self.state.lock().await;

        match state.sessions.get(upload_id) {
            Some((session_key, _)) if session_key == key => {}
            Some(_) => {
                return Err(StorageError::InvalidRequest(format!(
                    "upload `{}` does not belong to key `{}`",
                    upload_id, key
                )));
            }
            None => return Err(StorageError::NotFound(upload_id.to_string())),
        }

        if parts.is_empty() {
            return Err(StorageError::InvalidRequest("manifest has no parts".into()));
        }
        if parts
            .windows(2)
            .any(|pair| pair[0].part_number >= pair[1].part_number)
        {
            return Err(StorageError::InvalidRequest(
                "parts must be in ascending order".into(),
            ));
        }

        let (_, content_type) = state
            .sessions
            .remove(upload_id)
            .ok_or_else(|| StorageError::NotFound(upload_id.to_string()))?;
        let body = parts
            .iter()
            .map(|part| part.etag.as_str())
            .collect::<Vec<_>>()
            .join(",");
        state.objects.insert(
            key.to_string(),
            StoredObject {
                content_type,
                body: Bytes::from(body),
            },
        );
        state.completed.push(CompletedManifest {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            parts: parts.to_vec(),
        });

        Ok(format!("memory://{}", key))
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> StorageResult<()> {
        match self.state.lock().await.sessions.remove(upload_id) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(upload_id.to_string())),
        }
    }

    async fn put_object(&self, key: &str, content_type: &str, body: Bytes) -> StorageResult<()> {
        self.state.lock().await.objects.insert(
            key.to_string(),
            StoredObject {
                content_type: content_type.to_string(),
                body,
            },
        );
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::S3("simulated delete failure".into()));
        }
        match self.state.lock().await.objects.remove(key) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_rejects_out_of_order_manifest() {
        let backend = InMemoryBackend::new();
        let id = backend
            .create_multipart_upload("videos/a.webm", "video/webm")
            .await
            .unwrap();
        let err = backend
            .complete_multipart_upload(
                "videos/a.webm",
                &id,
                &[
                    CompletedPartInput::new(2, "b"),
                    CompletedPartInput::new(1, "a"),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidRequest(_)));
        assert!(backend.has_session(&id).await);
    }

    #[tokio::test]
    async fn abort_twice_reports_not_found_second_time() {
        let backend = InMemoryBackend::new();
        let id = backend
            .create_multipart_upload("videos/a.webm", "video/webm")
            .await
            .unwrap();
        backend
            .abort_multipart_upload("videos/a.webm", &id)
            .await
            .unwrap();
        let err = backend
            .abort_multipart_upload("videos/a.webm", &id)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn complete_after_abort_is_rejected() {
        let backend = InMemoryBackend::new();
        let id = backend
            .create_multipart_upload("videos/a.webm", "video/webm")
            .await
            .unwrap();
        backend
            .abort_multipart_upload("videos/a.webm", &id)
            .await
            .unwrap();
        let err = backend
            .complete_multipart_upload("videos/a.webm", &id, &[CompletedPartInput::new(1, "a")])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
