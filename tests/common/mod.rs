//! Shared fixtures: in-memory SQLite + in-memory storage.

use media_upload_service::{
    db,
    services::{
        memory_backend::InMemoryBackend, upload_coordinator::UploadCoordinator,
        upload_repository::UploadRepository,
    },
};
use std::sync::Arc;

/// Coordinator plus direct handles on its collaborators.
#[allow(dead_code)]
pub struct Harness {
    pub coordinator: UploadCoordinator,
    pub storage: InMemoryBackend,
    pub repo: UploadRepository,
}

#[allow(dead_code)]
impl Harness {
    pub async fn new() -> Self {
        let pool = db::connect_in_memory()
            .await
            .expect("Failed to open in-memory database");
        db::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let repo = UploadRepository::new(Arc::new(pool));
        let storage = InMemoryBackend::new();
        let coordinator = UploadCoordinator::new(repo.clone(), Arc::new(storage.clone()));

        Self {
            coordinator,
            storage,
            repo,
        }
    }
}
