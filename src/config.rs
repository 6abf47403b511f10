use crate::services::s3_backend::S3Settings;
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::env;

/// Which storage backend the service talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
    /// S3 or an S3-compatible service.
    S3,
    /// Process-local storage; nothing survives a restart.
    Memory,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Origin allowed to call the API from a browser.
    pub cors_origin: String,
    pub storage: StorageKind,
    /// Present when `storage` is `S3`.
    pub s3: Option<S3Settings>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Multipart media upload coordinator")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_SERVICE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_SERVICE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides UPLOAD_SERVICE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Allowed CORS origin (overrides UPLOAD_SERVICE_CORS_ORIGIN)
    #[arg(long)]
    pub cors_origin: Option<String>,

    /// Storage backend (overrides UPLOAD_SERVICE_STORAGE)
    #[arg(long, value_enum)]
    pub storage: Option<StorageKind>,

    /// Bucket name (overrides S3_BUCKET_NAME)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Bucket region (overrides AWS_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Custom S3 endpoint, e.g. a local MinIO (overrides S3_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Use path-style bucket addressing (overrides S3_FORCE_PATH_STYLE)
    #[arg(long)]
    pub force_path_style: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("UPLOAD_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("UPLOAD_SERVICE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing UPLOAD_SERVICE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 8000,
            Err(err) => return Err(err).context("reading UPLOAD_SERVICE_PORT"),
        };
        let env_db = env::var("UPLOAD_SERVICE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/uploads.db".into());
        let env_cors = env::var("UPLOAD_SERVICE_CORS_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".into());
        let env_storage = match env::var("UPLOAD_SERVICE_STORAGE") {
            Ok(value) => StorageKind::from_str(&value, true)
                .map_err(|err| anyhow::anyhow!(err))
                .with_context(|| format!("parsing UPLOAD_SERVICE_STORAGE value `{}`", value))?,
            Err(_) => StorageKind::S3,
        };
        let env_force_path_style = match env::var("S3_FORCE_PATH_STYLE") {
            Ok(value) => parse_bool(&value)
                .with_context(|| format!("parsing S3_FORCE_PATH_STYLE value `{}`", value))?,
            Err(_) => false,
        };

        // --- Merge ---
        let storage = args.storage.unwrap_or(env_storage);
        let s3 = match storage {
            StorageKind::S3 => {
                let bucket = args
                    .bucket
                    .or_else(|| non_empty_env("S3_BUCKET_NAME"))
                    .context("S3_BUCKET_NAME (or --bucket) is required for s3 storage")?;
                Some(S3Settings {
                    bucket,
                    region: args
                        .region
                        .or_else(|| non_empty_env("AWS_REGION"))
                        .unwrap_or_else(|| "us-east-2".into()),
                    endpoint: args.endpoint.or_else(|| non_empty_env("S3_ENDPOINT")),
                    access_key_id: non_empty_env("AWS_ACCESS_KEY_ID"),
                    secret_access_key: non_empty_env("AWS_SECRET_ACCESS_KEY"),
                    force_path_style: args.force_path_style || env_force_path_style,
                })
            }
            StorageKind::Memory => None,
        };

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            cors_origin: args.cors_origin.unwrap_or(env_cors),
            storage,
            s3,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("expected a boolean, got `{}`", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_booleans() {
        assert!(parse_bool("TRUE").unwrap());
        assert!(parse_bool(" 1 ").unwrap());
        assert!(!parse_bool("off").unwrap());
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn memory_storage_needs_no_bucket() {
        let args = Args::parse_from([
            "media-upload-service",
            "--storage",
            "memory",
            "--port",
            "9100",
            "--database-url",
            "sqlite::memory:",
        ]);
        let cfg = AppConfig::from_args(args).unwrap();
        assert_eq!(cfg.storage, StorageKind::Memory);
        assert!(cfg.s3.is_none());
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.addr(), format!("{}:9100", cfg.host));
    }

    #[test]
    fn cli_bucket_selects_s3_settings() {
        let args = Args::parse_from([
            "media-upload-service",
            "--storage",
            "s3",
            "--bucket",
            "recordings",
            "--region",
            "eu-west-1",
            "--force-path-style",
        ]);
        let cfg = AppConfig::from_args(args).unwrap();
        let s3 = cfg.s3.unwrap();
        assert_eq!(s3.bucket, "recordings");
        assert_eq!(s3.region, "eu-west-1");
        assert!(s3.force_path_style);
    }
}
