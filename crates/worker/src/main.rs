//! Export worker: consumes the export queue until the process is stopped.

use std::sync::Arc;

use anyhow::Context;

use wacrm_infra::config::WorkerConfig;
use wacrm_infra::jobs::{ExportJobProcessor, ProcessorDeps};
use wacrm_infra::postgres::{PgAuditLog, PgContext, PgCsvBuilder, PgExportJobStore, PgPermissionLookup};
use wacrm_infra::transport::RedisTransport;

fn main() -> anyhow::Result<()> {
    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            wacrm_observability::init();
            tracing::error!(error = %e, "invalid configuration");
            return Err(e.into());
        }
    };
    wacrm_observability::init_with_level(&config.log_level);

    match build(&config) {
        Ok((processor, _runtime)) => processor.run(),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "worker setup failed");
            Err(e)
        }
    }
}

/// Wire the processor. The runtime drives the Postgres pool and must outlive
/// the processor.
fn build(config: &WorkerConfig) -> anyhow::Result<(ExportJobProcessor, tokio::runtime::Runtime)> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    let database_url = config.require_database_url()?;
    let pg = PgContext::connect(database_url, runtime.handle().clone())
        .context("failed to connect to Postgres")?;

    let transport = Arc::new(
        RedisTransport::connect(&config.redis_url).context("failed to connect to Redis")?,
    );

    let deps = ProcessorDeps {
        store: Arc::new(PgExportJobStore::new(pg.clone())),
        permissions: Arc::new(PgPermissionLookup::new(pg.clone())),
        audit: Arc::new(PgAuditLog::new(pg.clone())),
        csv: Arc::new(PgCsvBuilder::new(pg)),
        transport: transport.clone(),
        bus: transport,
    };

    tracing::info!(
        queue = %config.queue,
        exports_dir = %config.exports_dir.display(),
        max_attempts = config.retry.max_attempts,
        "export worker configured"
    );
    Ok((ExportJobProcessor::new(deps, config.processor_settings()), runtime))
}
