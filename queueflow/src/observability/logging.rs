//! Logging setup and a logging error reporter.

use crate::config::LoggingConfig;
use crate::stage::ErrorReporter;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber.
///
/// Uses the `RUST_LOG` environment variable for filtering, falling back to
/// `config.level`. Returns false if a global subscriber was already set.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_thread_names(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.is_ok()
}

/// An error reporter that forwards every message to `tracing::error!`.
#[must_use]
pub fn logging_reporter() -> ErrorReporter {
    Arc::new(|message: &str| {
        tracing::error!(error = %message, "Pipeline worker reported an error");
    })
}
