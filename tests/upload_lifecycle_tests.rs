// Lifecycle tests for the upload coordinator against in-memory storage.
// Covers the storage-authoritative consistency rules: storage success is
// never undone by a metadata miss, and storage cleanup failures never block
// metadata deletion.

mod common;

use common::Harness;
use media_upload_service::{
    models::{
        multipart::CompletedPartInput,
        upload::{UploadPatch, UploadStatus},
    },
    services::{
        part_planner::DEFAULT_PART_SIZE,
        upload_coordinator::{AbortOutcome, InitiateUpload, SignChunk, UploadError},
        upload_repository::ListFilter,
    },
};
use std::{
    io,
    sync::{Arc, Mutex},
};
use tracing_subscriber::fmt::MakeWriter;
use uuid::Uuid;

/// Log sink shared between a scoped subscriber and the test body.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn initiate_req(owner: &str, filename: &str, desired_key: &str, size: i64) -> InitiateUpload {
    InitiateUpload {
        owner_id: owner.to_string(),
        filename: filename.to_string(),
        content_type: "video/webm".to_string(),
        desired_key: Some(desired_key.to_string()),
        declared_size: Some(size),
    }
}

#[tokio::test]
async fn initiate_generates_key_and_records_uploading() {
    let h = Harness::new().await;

    let initiated = h
        .coordinator
        .initiate(initiate_req("user-1", "clip.mov", "", 0))
        .await
        .unwrap();

    let id = initiated
        .key
        .strip_prefix("videos/")
        .and_then(|rest| rest.strip_suffix(".mov"))
        .expect("key should be videos/<uuid>.mov");
    assert!(Uuid::parse_str(id).is_ok(), "key {}", initiated.key);
    assert!(!initiated.upload_id.is_empty());
    assert_eq!(initiated.plan.part_size, DEFAULT_PART_SIZE);
    assert_eq!(initiated.plan.part_count, 1);

    let record = h.coordinator.get(initiated.record_id).await.unwrap();
    assert_eq!(record.status, UploadStatus::Uploading);
    assert_eq!(record.storage_key, initiated.key);
    assert_eq!(record.upload_id.as_deref(), Some(initiated.upload_id.as_str()));
    assert_eq!(record.owner_id, "user-1");
    assert!(record.file_size.is_none());
    assert!(record.completed_at.is_none());
    assert!(h.storage.has_session(&initiated.upload_id).await);
}

#[tokio::test]
async fn initiate_honours_desired_key_and_size() {
    let h = Harness::new().await;

    let size = 20 * 1024 * 1024;
    let initiated = h
        .coordinator
        .initiate(initiate_req("user-1", "clip.webm", "users/user-1/final/take.webm", size))
        .await
        .unwrap();

    assert_eq!(initiated.key, "users/user-1/final/take.webm");
    assert_eq!(initiated.plan.part_count, 3);
    let record = h.coordinator.get(initiated.record_id).await.unwrap();
    assert_eq!(record.file_size, Some(size));
}

#[tokio::test]
async fn initiate_rejects_duplicate_key_without_opening_session() {
    let h = Harness::new().await;
    h.coordinator
        .initiate(initiate_req("user-1", "a.webm", "videos/fixed.webm", 0))
        .await
        .unwrap();

    let err = h
        .coordinator
        .initiate(initiate_req("user-2", "b.webm", "videos/fixed.webm", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::KeyConflict(_)));
    assert_eq!(h.repo.list(&ListFilter::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn initiate_rejects_negative_size_and_unsafe_key() {
    let h = Harness::new().await;

    let err = h
        .coordinator
        .initiate(initiate_req("user-1", "a.webm", "", -1))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidSize(-1)));

    let err = h
        .coordinator
        .initiate(initiate_req("user-1", "a.webm", "../escape.webm", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidKey(_)));
}

#[tokio::test]
async fn complete_sorts_parts_and_marks_record() {
    let h = Harness::new().await;
    let initiated = h
        .coordinator
        .initiate(initiate_req("user-1", "clip.webm", "", 0))
        .await
        .unwrap();

    let completed = h
        .coordinator
        .complete(
            &initiated.upload_id,
            &initiated.key,
            vec![
                CompletedPartInput::new(2, "etag2"),
                CompletedPartInput::new(1, "etag1"),
            ],
        )
        .await
        .unwrap();

    let manifests = h.storage.completed_manifests().await;
    assert_eq!(manifests.len(), 1);
    assert_eq!(
        manifests[0].parts,
        vec![
            CompletedPartInput::new(1, "etag1"),
            CompletedPartInput::new(2, "etag2"),
        ]
    );

    assert_eq!(completed.key, initiated.key);
    assert!(!completed.location.is_empty());

    let record = completed.record.expect("record should be updated");
    assert_eq!(record.status, UploadStatus::Completed);
    assert!(record.completed_at.is_some());

    let marker = h
        .storage
        .object("videos/date.data")
        .await
        .expect("completion marker written");
    assert_eq!(marker.content_type, "application/json");
    let body: serde_json::Value = serde_json::from_slice(&marker.body).unwrap();
    let finished = body["finishedAt"].as_str().unwrap();
    assert!(finished.ends_with('Z'));
    assert!(chrono::NaiveDateTime::parse_from_str(
        finished.trim_end_matches('Z'),
        "%Y-%m-%dT%H:%M:%S%.f"
    )
    .is_ok());
}

#[tokio::test]
async fn complete_for_unknown_record_still_succeeds() {
    let h = Harness::new().await;

    // Storage session exists but no record was ever written for it.
    let upload_id = {
        use media_upload_service::services::storage_backend::StorageBackend;
        h.storage
            .create_multipart_upload("videos/orphan.webm", "video/webm")
            .await
            .unwrap()
    };

    let completed = h
        .coordinator
        .complete(
            &upload_id,
            "videos/orphan.webm",
            vec![CompletedPartInput::new(1, "etag1")],
        )
        .await
        .unwrap();

    assert!(completed.record.is_none());
    assert_eq!(completed.key, "videos/orphan.webm");
    assert!(h.storage.object("videos/orphan.webm").await.is_some());
    assert!(h.repo.list(&ListFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn complete_for_unknown_record_logs_warning_with_identifiers() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let h = Harness::new().await;
    let upload_id = {
        use media_upload_service::services::storage_backend::StorageBackend;
        h.storage
            .create_multipart_upload("videos/untracked.webm", "video/webm")
            .await
            .unwrap()
    };

    let completed = h
        .coordinator
        .complete(
            &upload_id,
            "videos/untracked.webm",
            vec![CompletedPartInput::new(1, "etag1")],
        )
        .await
        .unwrap();
    assert!(completed.record.is_none());

    let output = logs.contents();
    let line = output
        .lines()
        .find(|line| line.contains("no matching upload record"))
        .unwrap_or_else(|| panic!("no warning logged, got:\n{}", output));
    assert!(line.contains("WARN"), "{}", line);
    assert!(line.contains(&format!("upload_id={}", upload_id)), "{}", line);
    assert!(line.contains("key=videos/untracked.webm"), "{}", line);
}

#[tokio::test]
async fn complete_after_abort_is_rejected_and_record_stays_failed() {
    let h = Harness::new().await;
    let initiated = h
        .coordinator
        .initiate(initiate_req("user-1", "clip.webm", "", 0))
        .await
        .unwrap();

    h.coordinator
        .abort(&initiated.upload_id, &initiated.key)
        .await
        .unwrap();

    let err = h
        .coordinator
        .complete(
            &initiated.upload_id,
            &initiated.key,
            vec![CompletedPartInput::new(1, "etag1")],
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let record = h.coordinator.get(initiated.record_id).await.unwrap();
    assert_eq!(record.status, UploadStatus::Failed);
    assert!(record.completed_at.is_none());
}

#[tokio::test]
async fn abort_is_idempotent() {
    let h = Harness::new().await;
    let initiated = h
        .coordinator
        .initiate(initiate_req("user-1", "clip.webm", "", 0))
        .await
        .unwrap();

    let first = h
        .coordinator
        .abort(&initiated.upload_id, &initiated.key)
        .await
        .unwrap();
    let second = h
        .coordinator
        .abort(&initiated.upload_id, &initiated.key)
        .await
        .unwrap();

    assert_eq!(first, AbortOutcome::Aborted);
    assert_eq!(second, AbortOutcome::AlreadyGone);
    assert!(!h.storage.has_session(&initiated.upload_id).await);

    let record = h.coordinator.get(initiated.record_id).await.unwrap();
    assert_eq!(record.status, UploadStatus::Failed);
}

#[tokio::test]
async fn sign_part_and_chunk_produce_urls() {
    let h = Harness::new().await;

    let url = h
        .coordinator
        .sign_part("videos/a.webm", "up-123", 4)
        .await
        .unwrap();
    assert!(url.contains("videos/a.webm"));
    assert!(url.contains("partNumber=4"));
    assert!(url.contains("expires=3600"));

    let err = h
        .coordinator
        .sign_part("videos/a.webm", "up-123", 0)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidPartNumber(0)));

    let chunk = h
        .coordinator
        .sign_chunk(SignChunk {
            owner_id: "user-1".into(),
            recording_id: "rec-1".into(),
            sequence: 12,
            extension: "webm".into(),
            content_type: None,
        })
        .await
        .unwrap();
    assert_eq!(chunk.key, "users/user-1/latest/parts/rec-1/part-000012.webm");
    assert!(chunk.url.contains("content-type=video/webm"));
    assert!(chunk.url.contains("expires=600"));
    assert!(h.repo.list(&ListFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_succeeds_when_stored_object_is_missing() {
    let h = Harness::new().await;
    let initiated = h
        .coordinator
        .initiate(initiate_req("user-1", "clip.webm", "", 0))
        .await
        .unwrap();
    h.coordinator
        .abort(&initiated.upload_id, &initiated.key)
        .await
        .unwrap();

    // Nothing was ever assembled, so neither object exists in storage.
    h.coordinator.delete(initiated.record_id).await.unwrap();

    let err = h.coordinator.get(initiated.record_id).await.unwrap_err();
    assert!(matches!(err, UploadError::NotFound(_)));
}

#[tokio::test]
async fn delete_removes_object_and_marker() {
    let h = Harness::new().await;
    let initiated = h
        .coordinator
        .initiate(initiate_req("user-1", "clip.webm", "users/user-1/final/take.webm", 0))
        .await
        .unwrap();
    h.coordinator
        .complete(
            &initiated.upload_id,
            &initiated.key,
            vec![CompletedPartInput::new(1, "etag1")],
        )
        .await
        .unwrap();
    assert!(h.storage.object("users/user-1/final/date.data").await.is_some());

    h.coordinator.delete(initiated.record_id).await.unwrap();

    assert!(h.storage.object(&initiated.key).await.is_none());
    assert!(h.storage.object("users/user-1/final/date.data").await.is_none());
}

#[tokio::test]
async fn delete_proceeds_when_storage_fails() {
    let h = Harness::new().await;
    let initiated = h
        .coordinator
        .initiate(initiate_req("user-1", "clip.webm", "", 0))
        .await
        .unwrap();
    h.coordinator
        .complete(
            &initiated.upload_id,
            &initiated.key,
            vec![CompletedPartInput::new(1, "etag1")],
        )
        .await
        .unwrap();

    h.storage.fail_deletes(true);
    h.coordinator.delete(initiated.record_id).await.unwrap();

    assert!(h.repo.get(initiated.record_id).await.unwrap().is_none());
    assert!(h.storage.object(&initiated.key).await.is_some());
}

#[tokio::test]
async fn delete_of_in_flight_upload_releases_session() {
    let h = Harness::new().await;
    let initiated = h
        .coordinator
        .initiate(initiate_req("user-1", "clip.webm", "", 0))
        .await
        .unwrap();

    h.coordinator.delete(initiated.record_id).await.unwrap();
    assert!(!h.storage.has_session(&initiated.upload_id).await);
}

#[tokio::test]
async fn delete_unknown_record_is_not_found() {
    let h = Harness::new().await;
    let err = h.coordinator.delete(Uuid::new_v4()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn update_applies_only_supplied_fields_in_any_status() {
    let h = Harness::new().await;
    let initiated = h
        .coordinator
        .initiate(initiate_req("user-1", "clip.webm", "", 0))
        .await
        .unwrap();

    h.coordinator
        .update(
            initiated.record_id,
            &UploadPatch {
                description: Some("demo".into()),
                is_public: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    h.coordinator
        .complete(
            &initiated.upload_id,
            &initiated.key,
            vec![CompletedPartInput::new(1, "etag1")],
        )
        .await
        .unwrap();

    let updated = h
        .coordinator
        .update(
            initiated.record_id,
            &UploadPatch {
                title: Some("x".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.title.as_deref(), Some("x"));
    assert_eq!(updated.description.as_deref(), Some("demo"));
    assert!(updated.is_public);
    assert_eq!(updated.status, UploadStatus::Completed);

    let err = h
        .coordinator
        .update(Uuid::new_v4(), &UploadPatch::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn list_filters_by_owner_and_status() {
    let h = Harness::new().await;
    let a = h
        .coordinator
        .initiate(initiate_req("alice", "a.webm", "", 0))
        .await
        .unwrap();
    h.coordinator
        .initiate(initiate_req("bob", "b.webm", "", 0))
        .await
        .unwrap();
    let c = h
        .coordinator
        .initiate(initiate_req("alice", "c.webm", "", 0))
        .await
        .unwrap();
    h.coordinator
        .complete(&a.upload_id, &a.key, vec![CompletedPartInput::new(1, "e")])
        .await
        .unwrap();

    let alice = h
        .coordinator
        .list(&ListFilter {
            owner_id: Some("alice".into()),
            status: None,
        })
        .await
        .unwrap();
    let ids: Vec<_> = alice.iter().map(|r| r.id).collect();
    assert_eq!(ids, [c.record_id, a.record_id]);

    let uploading = h
        .coordinator
        .list(&ListFilter {
            owner_id: None,
            status: Some(UploadStatus::Uploading),
        })
        .await
        .unwrap();
    assert_eq!(uploading.len(), 2);
    assert!(uploading.iter().all(|r| r.status == UploadStatus::Uploading));
}
