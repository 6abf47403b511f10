//! Represents a single upload attempt and its lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Lifecycle state of an upload record.
///
/// Transitions are monotonic: `Uploading` moves to exactly one of the
/// terminal states and never leaves it.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UploadStatus {
    Uploading,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Uploading)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(Self::Uploading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown upload status `{}`", other)),
        }
    }
}

/// Durable metadata for one upload attempt.
///
/// The record does not hold any media bytes; those live in object storage
/// under `storage_key`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    /// Generated identifier for the record.
    pub id: Uuid,

    /// Opaque identifier of the caller that started the upload.
    pub owner_id: String,

    /// Destination object key. Unique across all records.
    pub storage_key: String,

    /// Original filename supplied by the caller.
    pub filename: String,

    /// MIME type the object is stored with.
    pub content_type: String,

    /// Multipart upload id assigned by the storage backend.
    pub upload_id: Option<String>,

    pub status: UploadStatus,

    pub created_at: DateTime<Utc>,

    /// Set exactly once, on the transition to `completed`.
    pub completed_at: Option<DateTime<Utc>>,

    /// Declared size in bytes, if the caller knew it.
    pub file_size: Option<i64>,

    /// Media duration in seconds.
    pub duration: Option<i64>,

    pub title: Option<String>,

    pub description: Option<String>,

    pub is_public: bool,
}

/// Fields required to create a record at initiation time.
#[derive(Clone, Debug)]
pub struct NewUpload {
    pub owner_id: String,
    pub storage_key: String,
    pub filename: String,
    pub content_type: String,
    pub upload_id: String,
    pub file_size: Option<i64>,
}

/// Partial update of the descriptive fields.
///
/// `None` leaves the stored value untouched.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct UploadPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
    pub duration: Option<i64>,
}

impl UploadPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.is_public.is_none()
            && self.duration.is_none()
    }
}
