//! Postgres adapters for the synchronous collaborator traits.
//!
//! The traits are synchronous (the processor runs on a plain thread), while
//! sqlx is async. Each adapter holds a runtime [`Handle`] and blocks on it.
//! Never call these from inside an async task: use `spawn_blocking` or a
//! dedicated thread.
//!
//! Schema: `crates/infra/migrations/0001_exports.sql`.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::runtime::Handle;

pub mod audit;
pub mod csv;
pub mod export_jobs;
pub mod permissions;

pub use audit::PgAuditLog;
pub use csv::PgCsvBuilder;
pub use export_jobs::PgExportJobStore;
pub use permissions::PgPermissionLookup;

/// Pool plus the runtime that drives it.
#[derive(Debug, Clone)]
pub struct PgContext {
    pub pool: PgPool,
    pub handle: Handle,
}

impl PgContext {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self { pool, handle }
    }

    /// Connect a pool on `handle`'s runtime.
    pub fn connect(database_url: &str, handle: Handle) -> Result<Self, sqlx::Error> {
        let pool = handle.block_on(
            PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url),
        )?;
        Ok(Self::new(pool, handle))
    }

    pub(crate) fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }
}
