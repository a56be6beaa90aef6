//! Logging and tracing bootstrap.

use anyhow::Context;
use bookstore_kernel::settings::{LogFormat, TelemetrySettings};
use tracing_subscriber::EnvFilter;

/// Build the filter from `RUST_LOG`, falling back to the configured directives.
pub fn env_filter(settings: &TelemetrySettings) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&settings.filter)
            .with_context(|| format!("invalid log filter '{}'", settings.filter)),
    }
}

/// Install the global tracing subscriber.
///
/// A subscriber that is already installed is left in place.
pub fn init(settings: &TelemetrySettings) -> anyhow::Result<()> {
    let filter = env_filter(settings)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match settings.log_format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    if installed.is_ok() {
        tracing::info!(
            target: "bookstore-telemetry",
            format = ?settings.log_format,
            "telemetry initialized"
        );
    }
    Ok(())
}
