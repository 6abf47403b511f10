//! HTTP handlers for the multipart upload lifecycle.
//!
//! - `POST   /api/upload/initiate`
//! - `POST   /api/upload/sign-part`
//! - `POST   /api/upload/sign-chunk`
//! - `POST   /api/upload/complete`
//! - `DELETE /api/upload/abort?upload_id=&key=`

use crate::{
    errors::AppError,
    handlers::extract::{ApiJson, ApiQuery},
    models::multipart::CompletedPartInput,
    services::upload_coordinator::{AbortOutcome, InitiateUpload, SignChunk, UploadCoordinator},
};
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Owner recorded when the client does not identify itself.
pub const DEFAULT_OWNER: &str = "unknown";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadReq {
    /// Missing or null falls back to [`DEFAULT_OWNER`]; an explicit empty
    /// string is rejected.
    #[serde(default, alias = "userId")]
    pub owner_id: Option<String>,
    pub filename: String,
    pub content_type: String,
    #[serde(default)]
    pub desired_key: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadResp {
    pub upload_id: String,
    pub key: String,
    /// Always empty; part URLs are requested one at a time via sign-part.
    pub urls: Vec<String>,
    pub part_size: u64,
    pub part_count: u64,
    pub record_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignPartReq {
    pub key: String,
    pub upload_id: String,
    pub part_number: i32,
}

#[derive(Debug, Serialize)]
pub struct SignPartResp {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignChunkReq {
    #[serde(alias = "ownerId")]
    pub user_id: String,
    pub recording_id: String,
    pub seq: u64,
    #[serde(default = "default_chunk_ext")]
    pub ext: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

fn default_chunk_ext() -> String {
    "webm".into()
}

#[derive(Debug, Serialize)]
pub struct SignChunkResp {
    pub success: bool,
    pub key: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadReq {
    pub upload_id: String,
    pub key: String,
    pub parts: Vec<CompletedPartInput>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResp {
    pub success: bool,
    pub location: String,
    pub key: String,
    /// False when no `uploading` record matched the upload id.
    pub record_updated: bool,
}

#[derive(Debug, Deserialize)]
pub struct AbortQuery {
    pub upload_id: String,
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct AbortResp {
    pub success: bool,
    pub message: String,
}

/// POST `/api/upload/initiate`: open a multipart upload.
pub async fn initiate_upload(
    State(coordinator): State<UploadCoordinator>,
    ApiJson(req): ApiJson<InitiateUploadReq>,
) -> Result<Json<InitiateUploadResp>, AppError> {
    let initiated = coordinator
        .initiate(InitiateUpload {
            owner_id: req
                .owner_id
                .unwrap_or_else(|| DEFAULT_OWNER.to_string()),
            filename: req.filename,
            content_type: req.content_type,
            desired_key: req.desired_key,
            declared_size: req.size,
        })
        .await?;

    Ok(Json(InitiateUploadResp {
        upload_id: initiated.upload_id,
        key: initiated.key,
        urls: Vec::new(),
        part_size: initiated.plan.part_size,
        part_count: initiated.plan.part_count,
        record_id: initiated.record_id,
    }))
}

/// POST `/api/upload/sign-part`: signed URL for one part.
pub async fn sign_part(
    State(coordinator): State<UploadCoordinator>,
    ApiJson(req): ApiJson<SignPartReq>,
) -> Result<Json<SignPartResp>, AppError> {
    let url = coordinator
        .sign_part(&req.key, &req.upload_id, req.part_number)
        .await?;
    Ok(Json(SignPartResp { url }))
}

/// POST `/api/upload/sign-chunk`: signed PUT for one live chunk.
pub async fn sign_chunk(
    State(coordinator): State<UploadCoordinator>,
    ApiJson(req): ApiJson<SignChunkReq>,
) -> Result<Json<SignChunkResp>, AppError> {
    let signed = coordinator
        .sign_chunk(SignChunk {
            owner_id: req.user_id,
            recording_id: req.recording_id,
            sequence: req.seq,
            extension: req.ext,
            content_type: req.content_type,
        })
        .await?;

    Ok(Json(SignChunkResp {
        success: true,
        key: signed.key,
        url: signed.url,
    }))
}

/// POST `/api/upload/complete`: assemble the uploaded parts.
pub async fn complete_upload(
    State(coordinator): State<UploadCoordinator>,
    ApiJson(req): ApiJson<CompleteUploadReq>,
) -> Result<Json<CompleteUploadResp>, AppError> {
    let completed = coordinator
        .complete(&req.upload_id, &req.key, req.parts)
        .await?;

    Ok(Json(CompleteUploadResp {
        success: true,
        location: completed.location,
        key: completed.key,
        record_updated: completed.record.is_some(),
    }))
}

/// DELETE `/api/upload/abort`: discard a multipart upload.
pub async fn abort_upload(
    State(coordinator): State<UploadCoordinator>,
    ApiQuery(q): ApiQuery<AbortQuery>,
) -> Result<Json<AbortResp>, AppError> {
    let outcome = coordinator.abort(&q.upload_id, &q.key).await?;

    let message = match outcome {
        AbortOutcome::Aborted => "Upload aborted",
        AbortOutcome::AlreadyGone => "Upload already aborted or unknown",
    };
    Ok(Json(AbortResp {
        success: true,
        message: message.into(),
    }))
}
