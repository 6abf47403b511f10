//! Defines routes for the upload lifecycle and record management.
//!
//! ## Structure
//! - **Upload lifecycle**
//!   - `POST   /api/upload/initiate`  : open a multipart upload
//!   - `POST   /api/upload/sign-part` : signed URL for one part
//!   - `POST   /api/upload/sign-chunk`: signed PUT for one live chunk
//!   - `POST   /api/upload/complete`  : assemble parts, mark record completed
//!   - `DELETE /api/upload/abort`     : discard a multipart upload
//!
//! - **Records**
//!   - `GET    /api/videos`     : list (filters: ownerId, status)
//!   - `GET    /api/videos/{id}`: fetch one
//!   - `PATCH  /api/videos/{id}`: edit title/description/visibility
//!   - `DELETE /api/videos/{id}`: remove record and stored objects

use crate::{
    handlers::{
        health_handlers::{healthz, readyz, service_health},
        upload_handlers::{abort_upload, complete_upload, initiate_upload, sign_chunk, sign_part},
        video_handlers::{delete_video, get_video, list_videos, update_video},
    },
    services::upload_coordinator::UploadCoordinator,
};
use axum::{
    Router,
    http::HeaderValue,
    routing::{delete, get, post},
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    trace::TraceLayer,
};

/// Build and return the router for all API routes.
///
/// The router carries shared state (`UploadCoordinator`) to all handlers.
pub fn routes() -> Router<UploadCoordinator> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/health", get(service_health))
        // Upload lifecycle
        .route("/api/upload/initiate", post(initiate_upload))
        .route("/api/upload/sign-part", post(sign_part))
        .route("/api/upload/sign-chunk", post(sign_chunk))
        .route("/api/upload/complete", post(complete_upload))
        .route("/api/upload/abort", delete(abort_upload))
        // Records
        .route("/api/videos", get(list_videos))
        .route(
            "/api/videos/{id}",
            get(get_video).patch(update_video).delete(delete_video),
        )
}

/// Wrap the routes with request tracing and a CORS policy for `origin`.
///
/// Credentials are allowed, so methods and headers are mirrored from the
/// preflight rather than wildcarded.
pub fn app(coordinator: UploadCoordinator, origin: &str) -> anyhow::Result<Router> {
    let origin = HeaderValue::from_str(origin)
        .map_err(|err| anyhow::anyhow!("invalid CORS origin `{}`: {}", origin, err))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request());

    Ok(routes()
        .with_state(coordinator)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}
