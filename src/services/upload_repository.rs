//! src/services/upload_repository.rs
//!
//! UploadRepository: durable upload records in the `video_uploads` SQLite
//! table. Status transitions are guarded in SQL so that a terminal record is
//! never rewritten, regardless of how requests interleave.

use crate::models::upload::{NewUpload, UploadPatch, UploadRecord, UploadStatus};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use uuid::Uuid;

const RECORD_COLUMNS: &str = "id, owner_id, storage_key, filename, content_type, upload_id, \
     status, created_at, completed_at, file_size, duration, title, description, is_public";

/// Filters for [`UploadRepository::list`]. `None` matches everything.
#[derive(Clone, Debug, Default)]
pub struct ListFilter {
    pub owner_id: Option<String>,
    pub status: Option<UploadStatus>,
}

#[derive(Clone)]
pub struct UploadRepository {
    db: Arc<SqlitePool>,
}

impl UploadRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Insert a new record in state `uploading`.
    pub async fn insert(&self, new: NewUpload) -> sqlx::Result<UploadRecord> {
        sqlx::query_as::<_, UploadRecord>(&format!(
            "INSERT INTO video_uploads (
                 id, owner_id, storage_key, filename, content_type, upload_id,
                 status, created_at, file_size, is_public
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
             RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&new.owner_id)
        .bind(&new.storage_key)
        .bind(&new.filename)
        .bind(&new.content_type)
        .bind(&new.upload_id)
        .bind(UploadStatus::Uploading)
        .bind(Utc::now())
        .bind(new.file_size)
        .fetch_one(&*self.db)
        .await
    }

    pub async fn get(&self, id: Uuid) -> sqlx::Result<Option<UploadRecord>> {
        sqlx::query_as::<_, UploadRecord>(&format!(
            "SELECT {} FROM video_uploads WHERE id = ?",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn find_by_upload_id(&self, upload_id: &str) -> sqlx::Result<Option<UploadRecord>> {
        sqlx::query_as::<_, UploadRecord>(&format!(
            "SELECT {} FROM video_uploads WHERE upload_id = ? ORDER BY created_at DESC LIMIT 1",
            RECORD_COLUMNS
        ))
        .bind(upload_id)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn find_by_storage_key(&self, key: &str) -> sqlx::Result<Option<UploadRecord>> {
        sqlx::query_as::<_, UploadRecord>(&format!(
            "SELECT {} FROM video_uploads WHERE storage_key = ?",
            RECORD_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&*self.db)
        .await
    }

    /// List records, most recent first.
    pub async fn list(&self, filter: &ListFilter) -> sqlx::Result<Vec<UploadRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM video_uploads WHERE 1 = 1",
            RECORD_COLUMNS
        ));

        if let Some(owner_id) = &filter.owner_id {
            builder.push(" AND owner_id = ");
            builder.push_bind(owner_id.clone());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status);
        }

        builder.push(" ORDER BY created_at DESC, rowid DESC");

        builder.build_query_as().fetch_all(&*self.db).await
    }

    /// Transition the record for `upload_id` from `uploading` to `completed`.
    ///
    /// Returns the updated record, or `None` when no `uploading` record
    /// matched.
    pub async fn mark_completed(
        &self,
        upload_id: &str,
        completed_at: DateTime<Utc>,
    ) -> sqlx::Result<Option<UploadRecord>> {
        sqlx::query_as::<_, UploadRecord>(&format!(
            "UPDATE video_uploads SET status = ?, completed_at = ?
             WHERE upload_id = ? AND status = ?
             RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(UploadStatus::Completed)
        .bind(completed_at)
        .bind(upload_id)
        .bind(UploadStatus::Uploading)
        .fetch_optional(&*self.db)
        .await
    }

    /// Transition the record for `upload_id` from `uploading` to `failed`.
    pub async fn mark_failed(&self, upload_id: &str) -> sqlx::Result<Option<UploadRecord>> {
        sqlx::query_as::<_, UploadRecord>(&format!(
            "UPDATE video_uploads SET status = ?
             WHERE upload_id = ? AND status = ?
             RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(UploadStatus::Failed)
        .bind(upload_id)
        .bind(UploadStatus::Uploading)
        .fetch_optional(&*self.db)
        .await
    }

    /// Apply the supplied descriptive fields; omitted ones keep their value.
    pub async fn update_details(
        &self,
        id: Uuid,
        patch: &UploadPatch,
    ) -> sqlx::Result<Option<UploadRecord>> {
        sqlx::query_as::<_, UploadRecord>(&format!(
            "UPDATE video_uploads SET
                 title = COALESCE(?, title),
                 description = COALESCE(?, description),
                 is_public = COALESCE(?, is_public),
                 duration = COALESCE(?, duration)
             WHERE id = ?
             RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(patch.title.as_deref())
        .bind(patch.description.as_deref())
        .bind(patch.is_public)
        .bind(patch.duration)
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    /// Remove a record. Returns false if it did not exist.
    pub async fn delete(&self, id: Uuid) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM video_uploads WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn ping(&self) -> sqlx::Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
            .map(|_| ())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
