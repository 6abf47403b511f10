use crate::services::{storage_backend::StorageError, upload_coordinator::UploadError};
use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::new(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::new(rejection.status(), rejection.body_text())
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::NotFound(_) | UploadError::Storage(StorageError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            UploadError::KeyConflict(_) => StatusCode::CONFLICT,
            UploadError::InvalidKey(_)
            | UploadError::InvalidSegment(_)
            | UploadError::InvalidSize(_)
            | UploadError::InvalidPartNumber(_)
            | UploadError::InvalidManifest(_)
            | UploadError::InvalidRequest(_)
            | UploadError::Storage(StorageError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            UploadError::Storage(_) => StatusCode::BAD_GATEWAY,
            UploadError::Sqlx(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn maps_error_kinds_to_status() {
        let cases = [
            (UploadError::NotFound(Uuid::new_v4()), StatusCode::NOT_FOUND),
            (
                UploadError::Storage(StorageError::NotFound("up-1".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                UploadError::KeyConflict("videos/a.webm".into()),
                StatusCode::CONFLICT,
            ),
            (UploadError::InvalidPartNumber(0), StatusCode::BAD_REQUEST),
            (
                UploadError::Storage(StorageError::S3("boom".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                UploadError::Sqlx(sqlx::Error::PoolClosed),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status, expected);
        }
    }

    #[test]
    fn storage_failures_keep_underlying_message() {
        let err = AppError::from(UploadError::Storage(StorageError::S3(
            "connection reset".into(),
        )));
        assert!(err.message.contains("connection reset"));
    }
}
