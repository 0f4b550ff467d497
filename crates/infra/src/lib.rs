//! Infrastructure layer: export jobs, queue transport, storage adapters and
//! configuration.

pub mod audit;
pub mod config;
pub mod exports;
pub mod jobs;
pub mod transport;

/// Postgres adapters (job store, permission lookup, audit, CSV builders).
#[cfg(feature = "postgres")]
pub mod postgres;

pub use audit::{AuditEntry, AuditLog, InMemoryAuditLog};
pub use config::{ConfigError, WorkerConfig};
pub use exports::{CsvBuilder, ExportError, ExportFiles};
