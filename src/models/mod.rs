//! Core data models for the upload service.
//!
//! Upload records map to the `video_uploads` table via `sqlx::FromRow` and
//! serialize as camelCase JSON via `serde`.

pub mod multipart;
pub mod upload;
