//! Tracing subscriber initialisation
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogFormat, LoggerConfig};
use crate::errors::{Result, TelemetryError};

/// Install the global subscriber
///
/// `RUST_LOG` overrides the configured level. Must be called once, before
/// the session starts.
pub fn init(config: &LoggerConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| TelemetryError::Config(format!("invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_ansi(config.ansi).with_target(false))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_ansi(config.ansi).with_thread_names(true))
            .try_init(),
    };

    installed.map_err(|e| TelemetryError::Config(format!("logger already initialised: {}", e)))
}
