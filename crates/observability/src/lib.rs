//! Tracing/logging setup shared by binaries and tests.

/// Initialize process-wide JSON logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::install(&LogConfig::default());
}

/// Initialize logging captured by the test harness.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_for_tests() {
    tracing::install(&LogConfig::for_tests());
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use tracing::{LogConfig, LogFormat};
