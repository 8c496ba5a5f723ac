//! Tracing/logging initialization.
//!
//! Filtering comes from `RUST_LOG`; routing decisions log at `trace`,
//! subscriptions at `debug` and handler faults at `warn`.

use tracing_subscriber::EnvFilter;

/// Output shape of the process-wide subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line, with timestamps.
    #[default]
    Json,
    /// Compact human-readable lines routed through the test writer.
    Test,
}

/// Subscriber settings used when `RUST_LOG` is unset or invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub default_filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            default_filter: "info".to_string(),
        }
    }
}

impl LogConfig {
    pub fn for_tests() -> Self {
        Self {
            format: LogFormat::Test,
            default_filter: "warn".to_string(),
        }
    }

    pub fn with_default_filter(mut self, directives: impl Into<String>) -> Self {
        self.default_filter = directives.into();
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Install the global subscriber described by `config`.
///
/// Returns `false` when a subscriber was already installed; the call is then a no-op.
pub fn install(config: &LogConfig) -> bool {
    let builder = tracing_subscriber::fmt().with_env_filter(config.filter());
    match config.format {
        LogFormat::Json => builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init()
            .is_ok(),
        LogFormat::Test => builder.compact().with_test_writer().try_init().is_ok(),
    }
}
