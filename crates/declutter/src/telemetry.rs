//! Process-wide tracing setup.

use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to install log bridge: {0}")]
    LogBridge(#[from] log::SetLoggerError),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs the global subscriber: `RUST_LOG`-style filtering with the
/// given fallback, compact stderr output, and a bridge so `log` records
/// from the storage and database layers land in the same stream.
///
/// Call once at startup; a second call reports an error.
pub fn init(default_filter: &str) -> Result<(), TelemetryError> {
    tracing_log::LogTracer::init()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .try_init()?;

    Ok(())
}
