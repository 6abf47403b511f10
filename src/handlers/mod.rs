//! HTTP handlers. Each delegates to `UploadCoordinator` and maps results to
//! JSON responses.

pub mod extract;
pub mod health_handlers;
pub mod upload_handlers;
pub mod video_handlers;
