//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG`, else `fallback` (e.g. the configured `LOG_LEVEL`).
///
/// An unparseable fallback degrades to `info`.
pub fn filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install JSON logs with timestamps.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(fallback: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(fallback))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init("debug");
        init("not a valid directive [");
    }
}
