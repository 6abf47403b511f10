//! HTTP handlers for browsing and editing upload records.

use crate::{
    errors::AppError,
    handlers::extract::{ApiJson, ApiQuery},
    models::upload::{UploadPatch, UploadRecord, UploadStatus},
    services::{upload_coordinator::UploadCoordinator, upload_repository::ListFilter},
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

/// Query params accepted by the listing endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListVideosQuery {
    #[serde(alias = "userId")]
    pub owner_id: Option<String>,
    pub status: Option<String>,
}

/// GET `/api/videos`: list records, newest first.
pub async fn list_videos(
    State(coordinator): State<UploadCoordinator>,
    ApiQuery(q): ApiQuery<ListVideosQuery>,
) -> Result<Json<Vec<UploadRecord>>, AppError> {
    let status = q
        .status
        .as_deref()
        .map(str::parse::<UploadStatus>)
        .transpose()
        .map_err(AppError::bad_request)?;

    let records = coordinator
        .list(&ListFilter {
            owner_id: q.owner_id,
            status,
        })
        .await?;
    Ok(Json(records))
}

/// GET `/api/videos/{id}`
pub async fn get_video(
    State(coordinator): State<UploadCoordinator>,
    Path(id): Path<String>,
) -> Result<Json<UploadRecord>, AppError> {
    let record = coordinator.get(parse_id(&id)?).await?;
    Ok(Json(record))
}

/// PATCH `/api/videos/{id}`: partial update of title/description/visibility.
pub async fn update_video(
    State(coordinator): State<UploadCoordinator>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<UploadPatch>,
) -> Result<Json<UploadRecord>, AppError> {
    let record = coordinator.update(parse_id(&id)?, &patch).await?;
    Ok(Json(record))
}

/// DELETE `/api/videos/{id}`: remove the record and its stored objects.
pub async fn delete_video(
    State(coordinator): State<UploadCoordinator>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    coordinator.delete(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Unparseable ids cannot name a record, so they are reported as not found.
fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::not_found(format!("upload record `{}` not found", raw)))
}
