//! Tracing/logging setup shared by the API and the worker.

/// Initialize process-wide tracing with the default `info` fallback.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init("info");
}

/// Initialize tracing, falling back to `level` when `RUST_LOG` is unset.
pub fn init_with_level(level: &str) {
    tracing::init(level);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
