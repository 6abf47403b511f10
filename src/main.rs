use anyhow::Result;
use media_upload_service::{
    config::{self, StorageKind},
    db, routes,
    services::{
        memory_backend::InMemoryBackend,
        s3_backend::S3Backend,
        storage_backend::StorageBackend,
        upload_coordinator::UploadCoordinator,
        upload_repository::UploadRepository,
    },
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- .env (optional) ---
    let dotenv = dotenvy::dotenv();

    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting media-upload-service with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Storage backend ---
    let storage: Arc<dyn StorageBackend> = match (cfg.storage, cfg.s3.clone()) {
        (StorageKind::S3, Some(settings)) => Arc::new(S3Backend::new(settings).await?),
        (StorageKind::S3, None) => anyhow::bail!("s3 storage selected without s3 settings"),
        (StorageKind::Memory, _) => {
            tracing::warn!("Using in-memory storage; uploaded objects are not persisted");
            Arc::new(InMemoryBackend::new())
        }
    };

    // --- Initialize core service ---
    let coordinator = UploadCoordinator::new(UploadRepository::new(db.clone()), storage);

    // --- Build router ---
    let app = routes::routes::app(coordinator, &cfg.cors_origin)?;

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
