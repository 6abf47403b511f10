//! Represents multipart upload plans and uploaded parts.

use serde::{Deserialize, Serialize};

/// Part layout chosen for a file before any bytes are sent.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartPlan {
    /// Size in bytes of every part except possibly the last.
    pub part_size: u64,

    /// Number of parts the file will be split into.
    pub part_count: u64,
}

/// A part the client uploaded directly to storage.
///
/// Accepts both the S3 casing the browser client forwards (`PartNumber`,
/// `ETag`) and camelCase.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CompletedPartInput {
    /// Part number (1-based).
    #[serde(rename = "PartNumber", alias = "partNumber")]
    pub part_number: i32,

    /// Entity tag returned by storage for this part.
    #[serde(rename = "ETag", alias = "etag", alias = "eTag")]
    pub etag: String,
}

impl CompletedPartInput {
    pub fn new(part_number: i32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
        }
    }
}
