//! src/services/upload_coordinator.rs
//!
//! UploadCoordinator: owns the multipart upload lifecycle
//! (initiate → sign parts → complete | abort) and keeps the metadata record
//! in step with object storage.
//!
//! Storage and metadata are two independent systems with no shared
//! transaction. Storage is authoritative: once a storage call succeeds the
//! operation succeeds, and a metadata write that fails or finds nothing to
//! update afterwards is logged at `warn` with `upload_id`/`key` fields instead
//! of being rolled back.

use crate::{
    models::{
        multipart::{CompletedPartInput, PartPlan},
        upload::{NewUpload, UploadPatch, UploadRecord, UploadStatus},
    },
    services::{
        part_planner::{self, MAX_PARTS},
        storage_backend::{PresignTarget, StorageBackend, StorageError},
        upload_repository::{ListFilter, UploadRepository, is_unique_violation},
    },
};
use bytes::Bytes;
use chrono::Utc;
use std::{path::Path, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Prefix for keys generated when the caller does not choose one.
pub const GENERATED_KEY_PREFIX: &str = "videos/";

/// Extension used when the filename carries none.
pub const DEFAULT_EXTENSION: &str = ".webm";

/// Name of the completion marker written next to each assembled object.
pub const COMPLETION_MARKER_NAME: &str = "date.data";

/// Lifetime of a signed part-upload URL.
pub const PART_URL_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Lifetime of a signed live-chunk URL.
pub const CHUNK_URL_EXPIRY: Duration = Duration::from_secs(10 * 60);

const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload record `{0}` not found")]
    NotFound(Uuid),
    #[error("storage key `{0}` is already in use")]
    KeyConflict(String),
    #[error("invalid storage key `{0}`")]
    InvalidKey(String),
    #[error("invalid path segment `{0}`")]
    InvalidSegment(String),
    #[error("declared size must be non-negative, got {0}")]
    InvalidSize(i64),
    #[error("part number {0} is outside 1..=10000")]
    InvalidPartNumber(i32),
    #[error("invalid part manifest: {0}")]
    InvalidManifest(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("storage operation failed: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl UploadError {
    /// True when the failure means "the thing does not exist" rather than
    /// "the operation failed".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Storage(StorageError::NotFound(_)))
    }
}

pub type UploadResult<T> = Result<T, UploadError>;

#[derive(Clone, Debug)]
pub struct InitiateUpload {
    pub owner_id: String,
    pub filename: String,
    pub content_type: String,
    /// Destination key; `None` or empty generates one under `videos/`.
    pub desired_key: Option<String>,
    /// Size in bytes if known. Zero means unknown.
    pub declared_size: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct InitiatedUpload {
    pub upload_id: String,
    pub key: String,
    pub plan: PartPlan,
    pub record_id: Uuid,
}

#[derive(Clone, Debug)]
pub struct SignChunk {
    pub owner_id: String,
    pub recording_id: String,
    pub sequence: u64,
    pub extension: String,
    pub content_type: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SignedChunk {
    pub key: String,
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct CompletedUpload {
    pub location: String,
    pub key: String,
    /// The record moved to `completed`, if one matched.
    pub record: Option<UploadRecord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortOutcome {
    Aborted,
    /// Storage no longer knew the session (already aborted or completed).
    AlreadyGone,
}

#[derive(Clone)]
pub struct UploadCoordinator {
    repo: UploadRepository,
    storage: Arc<dyn StorageBackend>,
}

impl UploadCoordinator {
    pub fn new(repo: UploadRepository, storage: Arc<dyn StorageBackend>) -> Self {
        Self { repo, storage }
    }

    pub fn repository(&self) -> &UploadRepository {
        &self.repo
    }

    pub fn storage(&self) -> &dyn StorageBackend {
        self.storage.as_ref()
    }

    /// Open a multipart upload and record it as `uploading`.
    ///
    /// If the record cannot be written after storage accepted the upload, the
    /// storage-side session is left open; it is logged at `error` for
    /// reconciliation.
    pub async fn initiate(&self, req: InitiateUpload) -> UploadResult<InitiatedUpload> {
        if req.owner_id.trim().is_empty() {
            return Err(UploadError::InvalidRequest("ownerId is required".into()));
        }
        if req.content_type.trim().is_empty() {
            return Err(UploadError::InvalidRequest("contentType is required".into()));
        }
        if let Some(size) = req.declared_size.filter(|size| *size < 0) {
            return Err(UploadError::InvalidSize(size));
        }

        let key = match req.desired_key.filter(|key| !key.is_empty()) {
            Some(key) => {
                ensure_key_safe(&key)?;
                key
            }
            None => generated_key(&req.filename),
        };
        let plan = part_planner::plan(req.declared_size);

        if self.repo.find_by_storage_key(&key).await?.is_some() {
            return Err(UploadError::KeyConflict(key));
        }

        let upload_id = self
            .storage
            .create_multipart_upload(&key, &req.content_type)
            .await?;

        let record = match self
            .repo
            .insert(NewUpload {
                owner_id: req.owner_id,
                storage_key: key.clone(),
                filename: req.filename,
                content_type: req.content_type,
                upload_id: upload_id.clone(),
                file_size: req.declared_size.filter(|size| *size > 0),
            })
            .await
        {
            Ok(record) => record,
            Err(err) => {
                error!(
                    upload_id = %upload_id,
                    key = %key,
                    error = %err,
                    "upload record not persisted; storage multipart upload left open"
                );
                if is_unique_violation(&err) {
                    return Err(UploadError::KeyConflict(key));
                }
                return Err(err.into());
            }
        };

        info!(
            record_id = %record.id,
            upload_id = %upload_id,
            key = %key,
            part_size = plan.part_size,
            "initiated multipart upload"
        );

        Ok(InitiatedUpload {
            upload_id,
            key,
            plan,
            record_id: record.id,
        })
    }

    /// Sign a URL for uploading one part.
    ///
    /// The `(key, upload_id)` pairing is not checked against any stored
    /// record.
    pub async fn sign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
    ) -> UploadResult<String> {
        ensure_key_safe(key)?;
        if upload_id.trim().is_empty() {
            return Err(UploadError::InvalidRequest("uploadId is required".into()));
        }
        ensure_part_number(part_number)?;

        let url = self
            .storage
            .presign(
                PresignTarget::UploadPart {
                    key: key.to_string(),
                    upload_id: upload_id.to_string(),
                    part_number,
                },
                PART_URL_EXPIRY,
            )
            .await?;
        Ok(url)
    }

    /// Sign a single-object PUT for one live chunk of a recording.
    ///
    /// No record is created for chunks.
    pub async fn sign_chunk(&self, req: SignChunk) -> UploadResult<SignedChunk> {
        let key = chunk_key(
            &req.owner_id,
            &req.recording_id,
            req.sequence,
            &req.extension,
        )?;
        let content_type = req
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| format!("video/{}", req.extension));

        let url = self
            .storage
            .presign(
                PresignTarget::PutObject {
                    key: key.clone(),
                    content_type,
                },
                CHUNK_URL_EXPIRY,
            )
            .await?;
        Ok(SignedChunk { key, url })
    }

    /// Assemble the object from `parts`, drop a completion marker next to it
    /// and move the matching record to `completed`.
    pub async fn complete(
        &self,
        upload_id: &str,
        key: &str,
        parts: Vec<CompletedPartInput>,
    ) -> UploadResult<CompletedUpload> {
        ensure_key_safe(key)?;
        let parts = sorted_manifest(parts)?;

        let location = self
            .storage
            .complete_multipart_upload(key, upload_id, &parts)
            .await?;

        self.write_completion_marker(key).await;

        let completed_at = Utc::now();
        let record = match self.repo.mark_completed(upload_id, completed_at).await {
            Ok(Some(record)) => {
                info!(record_id = %record.id, upload_id = %upload_id, key = %key, "upload completed");
                Some(record)
            }
            Ok(None) => {
                self.log_unmatched_completion(upload_id, key).await;
                None
            }
            Err(err) => {
                warn!(
                    upload_id = %upload_id,
                    key = %key,
                    error = %err,
                    "storage upload completed but record could not be updated"
                );
                None
            }
        };

        Ok(CompletedUpload {
            location,
            key: key.to_string(),
            record,
        })
    }

    /// Discard a multipart upload.
    ///
    /// An unknown or already-released session is `AlreadyGone`, not an error.
    /// A matching `uploading` record is moved to `failed`.
    pub async fn abort(&self, upload_id: &str, key: &str) -> UploadResult<AbortOutcome> {
        if upload_id.trim().is_empty() {
            return Err(UploadError::InvalidRequest("upload_id is required".into()));
        }
        ensure_key_safe(key)?;

        let outcome = match self.storage.abort_multipart_upload(key, upload_id).await {
            Ok(()) => AbortOutcome::Aborted,
            Err(StorageError::NotFound(_)) => {
                debug!(upload_id = %upload_id, key = %key, "multipart upload already gone");
                AbortOutcome::AlreadyGone
            }
            Err(err) => return Err(err.into()),
        };

        match self.repo.mark_failed(upload_id).await {
            Ok(Some(record)) => {
                info!(record_id = %record.id, upload_id = %upload_id, "upload aborted");
            }
            Ok(None) => {
                debug!(upload_id = %upload_id, "no uploading record to mark failed");
            }
            Err(err) => {
                warn!(
                    upload_id = %upload_id,
                    key = %key,
                    error = %err,
                    "storage upload aborted but record could not be marked failed"
                );
            }
        }

        Ok(outcome)
    }

    pub async fn list(&self, filter: &ListFilter) -> UploadResult<Vec<UploadRecord>> {
        Ok(self.repo.list(filter).await?)
    }

    pub async fn get(&self, id: Uuid) -> UploadResult<UploadRecord> {
        self.repo.get(id).await?.ok_or(UploadError::NotFound(id))
    }

    /// Apply a partial update of the descriptive fields. Valid in any status.
    pub async fn update(&self, id: Uuid, patch: &UploadPatch) -> UploadResult<UploadRecord> {
        self.repo
            .update_details(id, patch)
            .await?
            .ok_or(UploadError::NotFound(id))
    }

    /// Remove a record and, best-effort, its stored object and completion
    /// marker. Storage failures are logged and never block the metadata
    /// delete.
    pub async fn delete(&self, id: Uuid) -> UploadResult<()> {
        let record = self.get(id).await?;

        if record.status == UploadStatus::Uploading {
            if let Some(upload_id) = record.upload_id.as_deref() {
                match self
                    .storage
                    .abort_multipart_upload(&record.storage_key, upload_id)
                    .await
                {
                    Ok(()) | Err(StorageError::NotFound(_)) => {}
                    Err(err) => warn!(
                        record_id = %id,
                        upload_id = %upload_id,
                        error = %err,
                        "failed to abort multipart upload while deleting record"
                    ),
                }
            }
        }

        for key in [
            record.storage_key.clone(),
            completion_marker_key(&record.storage_key),
        ] {
            match self.storage.delete_object(&key).await {
                Ok(()) => debug!(record_id = %id, key = %key, "removed stored object"),
                Err(StorageError::NotFound(_)) => {
                    debug!(record_id = %id, key = %key, "stored object already missing");
                }
                Err(err) => warn!(
                    record_id = %id,
                    key = %key,
                    error = %err,
                    "failed to delete stored object; removing record anyway"
                ),
            }
        }

        if !self.repo.delete(id).await? {
            return Err(UploadError::NotFound(id));
        }
        info!(record_id = %id, key = %record.storage_key, "upload record deleted");
        Ok(())
    }

    async fn write_completion_marker(&self, key: &str) {
        let marker_key = completion_marker_key(key);
        let body = serde_json::json!({
            "finishedAt": format!("{}Z", Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f")),
        });

        if let Err(err) = self
            .storage
            .put_object(&marker_key, "application/json", Bytes::from(body.to_string()))
            .await
        {
            warn!(
                key = %key,
                marker_key = %marker_key,
                error = %err,
                "failed to write completion marker"
            );
        }
    }

    async fn log_unmatched_completion(&self, upload_id: &str, key: &str) {
        match self.repo.find_by_upload_id(upload_id).await {
            Ok(Some(record)) => warn!(
                record_id = %record.id,
                upload_id = %upload_id,
                key = %key,
                status = %record.status,
                "storage upload completed but record was already terminal"
            ),
            Ok(None) => warn!(
                upload_id = %upload_id,
                key = %key,
                "storage upload completed with no matching upload record"
            ),
            Err(err) => warn!(
                upload_id = %upload_id,
                key = %key,
                error = %err,
                "storage upload completed but record lookup failed"
            ),
        }
    }
}

/// Sort parts ascending by part number and reject empty or duplicated
/// manifests.
pub fn sorted_manifest(
    mut parts: Vec<CompletedPartInput>,
) -> UploadResult<Vec<CompletedPartInput>> {
    if parts.is_empty() {
        return Err(UploadError::InvalidManifest("no parts supplied".into()));
    }
    for part in &parts {
        ensure_part_number(part.part_number)?;
    }

    parts.sort_by_key(|part| part.part_number);

    if let Some(pair) = parts
        .windows(2)
        .find(|pair| pair[0].part_number == pair[1].part_number)
    {
        return Err(UploadError::InvalidManifest(format!(
            "duplicate part number {}",
            pair[0].part_number
        )));
    }
    Ok(parts)
}

/// Key for an upload whose caller did not choose one:
/// `videos/<uuid><ext>`, where `<ext>` comes from `filename`.
pub fn generated_key(filename: &str) -> String {
    let extension = Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    format!("{}{}{}", GENERATED_KEY_PREFIX, Uuid::new_v4(), extension)
}

/// Key of the completion marker for `key`: same prefix, file name replaced.
pub fn completion_marker_key(key: &str) -> String {
    let prefix = key.rsplit_once('/').map(|(prefix, _)| prefix).unwrap_or("");
    format!("{}/{}", prefix, COMPLETION_MARKER_NAME)
}

/// `users/<owner>/latest/parts/<recording>/part-<seq:06>.<ext>`
pub fn chunk_key(
    owner_id: &str,
    recording_id: &str,
    sequence: u64,
    extension: &str,
) -> UploadResult<String> {
    for segment in [owner_id, recording_id, extension] {
        ensure_segment_safe(segment)?;
    }
    Ok(format!(
        "users/{}/latest/parts/{}/part-{:06}.{}",
        owner_id, recording_id, sequence, extension
    ))
}

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects keys that are empty, too long, begin with `/`, contain `..`, or
/// contain backslashes or control bytes.
fn ensure_key_safe(key: &str) -> UploadResult<()> {
    if key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.contains("..")
        || key.bytes().any(|b| b.is_ascii_control() || b == b'\\')
    {
        return Err(UploadError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn ensure_part_number(part_number: i32) -> UploadResult<()> {
    if part_number < 1 || i64::from(part_number) > MAX_PARTS as i64 {
        return Err(UploadError::InvalidPartNumber(part_number));
    }
    Ok(())
}

fn ensure_segment_safe(segment: &str) -> UploadResult<()> {
    if segment.trim().is_empty()
        || segment.contains('/')
        || segment.contains("..")
        || segment.bytes().any(|b| b.is_ascii_control() || b == b'\\')
    {
        return Err(UploadError::InvalidSegment(segment.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_uses_filename_extension() {
        let key = generated_key("clip.mov");
        let rest = key.strip_prefix("videos/").unwrap();
        let id = rest.strip_suffix(".mov").unwrap();
        assert!(Uuid::parse_str(id).is_ok());

        assert!(generated_key("archive.tar.gz").ends_with(".gz"));
    }

    #[test]
    fn generated_key_defaults_to_webm() {
        assert!(generated_key("recording").ends_with(".webm"));
        assert!(generated_key("").ends_with(".webm"));
        assert_ne!(generated_key("a.webm"), generated_key("a.webm"));
    }

    #[test]
    fn marker_sits_next_to_object() {
        assert_eq!(
            completion_marker_key("videos/abc.webm"),
            "videos/date.data"
        );
        assert_eq!(
            completion_marker_key("users/u1/final/x.webm"),
            "users/u1/final/date.data"
        );
        assert_eq!(completion_marker_key("top.webm"), "/date.data");
    }

    #[test]
    fn chunk_key_zero_pads_sequence() {
        assert_eq!(
            chunk_key("u1", "rec-9", 7, "webm").unwrap(),
            "users/u1/latest/parts/rec-9/part-000007.webm"
        );
        assert_eq!(
            chunk_key("u1", "rec-9", 1_234_567, "mp4").unwrap(),
            "users/u1/latest/parts/rec-9/part-1234567.mp4"
        );
    }

    #[test]
    fn chunk_key_orders_lexicographically() {
        let a = chunk_key("u", "r", 9, "webm").unwrap();
        let b = chunk_key("u", "r", 10, "webm").unwrap();
        assert!(a < b);
    }

    #[test]
    fn chunk_key_rejects_traversal_segments() {
        assert!(matches!(
            chunk_key("../etc", "r", 1, "webm"),
            Err(UploadError::InvalidSegment(_))
        ));
        assert!(chunk_key("u", "a/b", 1, "webm").is_err());
        assert!(chunk_key("u", "r", 1, "").is_err());
    }

    #[test]
    fn manifest_is_sorted_ascending() {
        let sorted = sorted_manifest(vec![
            CompletedPartInput::new(3, "c"),
            CompletedPartInput::new(1, "a"),
            CompletedPartInput::new(2, "b"),
        ])
        .unwrap();
        let numbers: Vec<_> = sorted.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, [1, 2, 3]);
    }

    #[test]
    fn manifest_rejects_empty_duplicate_and_out_of_range() {
        assert!(matches!(
            sorted_manifest(Vec::new()),
            Err(UploadError::InvalidManifest(_))
        ));
        assert!(matches!(
            sorted_manifest(vec![
                CompletedPartInput::new(1, "a"),
                CompletedPartInput::new(1, "b"),
            ]),
            Err(UploadError::InvalidManifest(_))
        ));
        assert!(matches!(
            sorted_manifest(vec![CompletedPartInput::new(0, "a")]),
            Err(UploadError::InvalidPartNumber(0))
        ));
        assert!(matches!(
            sorted_manifest(vec![CompletedPartInput::new(10_001, "a")]),
            Err(UploadError::InvalidPartNumber(10_001))
        ));
    }

    #[test]
    fn key_validation() {
        assert!(ensure_key_safe("videos/a.webm").is_ok());
        for bad in ["", "/abs", "videos/../x", "a\\b", "a\nb"] {
            assert!(ensure_key_safe(bad).is_err(), "{:?}", bad);
        }
        assert!(ensure_key_safe(&"k".repeat(MAX_OBJECT_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn not_found_kinds_are_distinguished() {
        assert!(UploadError::NotFound(Uuid::new_v4()).is_not_found());
        assert!(UploadError::Storage(StorageError::NotFound("x".into())).is_not_found());
        assert!(!UploadError::Storage(StorageError::Config("x".into())).is_not_found());
    }
}
