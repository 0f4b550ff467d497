//! Backend wiring for the HTTP layer.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Duration;
use tracing::info;

use wacrm_auth::{DownloadTokens, PermissionLookup, StaticPermissions};
use wacrm_infra::audit::{AuditLog, InMemoryAuditLog};
use wacrm_infra::exports::ExportFiles;
use wacrm_infra::jobs::{ExportJobStore, InMemoryExportJobStore};
use wacrm_infra::postgres::{PgAuditLog, PgContext, PgExportJobStore, PgPermissionLookup};
use wacrm_infra::transport::{InMemoryTransport, QueueTransport, RedisTransport};

use crate::config::ApiConfig;

/// Everything the handlers and the gate need.
#[derive(Clone)]
pub struct AppServices {
    pub store: Arc<dyn ExportJobStore>,
    pub permissions: Arc<dyn PermissionLookup>,
    pub transport: Arc<dyn QueueTransport>,
    pub audit: Arc<dyn AuditLog>,
    pub files: ExportFiles,
    pub queue: String,
    pub download_tokens: DownloadTokens,
}

/// In-memory backends (dev/test). Keep this around to seed data or inspect
/// what the API did.
#[derive(Clone)]
pub struct InMemoryBackends {
    pub store: Arc<InMemoryExportJobStore>,
    pub permissions: Arc<StaticPermissions>,
    pub transport: Arc<InMemoryTransport>,
    pub audit: Arc<InMemoryAuditLog>,
    pub exports_dir: PathBuf,
}

impl InMemoryBackends {
    pub fn new(exports_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: InMemoryExportJobStore::arc(),
            permissions: Arc::new(StaticPermissions::new()),
            transport: Arc::new(InMemoryTransport::new()),
            audit: Arc::new(InMemoryAuditLog::new()),
            exports_dir: exports_dir.into(),
        }
    }

    pub fn services(&self, queue: &str, download_tokens: DownloadTokens) -> AppServices {
        AppServices {
            store: self.store.clone(),
            permissions: self.permissions.clone(),
            transport: self.transport.clone(),
            audit: self.audit.clone(),
            files: ExportFiles::new(self.exports_dir.clone()),
            queue: queue.to_string(),
            download_tokens,
        }
    }
}

pub fn download_tokens(config: &ApiConfig) -> DownloadTokens {
    DownloadTokens::new(
        config.download_secret.as_bytes(),
        Duration::seconds(config.download_ttl_secs),
    )
}

/// Postgres + Redis wiring.
///
/// The adapters block on the current runtime, so handlers reach them through
/// `spawn_blocking`.
pub async fn build_persistent_services(config: &ApiConfig) -> anyhow::Result<AppServices> {
    let database_url = config.worker.require_database_url()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    let pg = PgContext::new(pool, tokio::runtime::Handle::current());

    let redis_url = config.worker.redis_url.clone();
    let transport = tokio::task::spawn_blocking(move || RedisTransport::connect(redis_url))
        .await?
        .context("failed to connect to Redis")?;

    info!("using Postgres + Redis backends");
    Ok(AppServices {
        store: Arc::new(PgExportJobStore::new(pg.clone())),
        permissions: Arc::new(PgPermissionLookup::new(pg.clone())),
        transport: Arc::new(transport),
        audit: Arc::new(PgAuditLog::new(pg)),
        files: ExportFiles::new(config.worker.exports_dir.clone()),
        queue: config.worker.queue.clone(),
        download_tokens: download_tokens(config),
    })
}
