//! Structured logging configuration.
//!
//! User-facing output (prompts, tables, `File written:` lines) stays on
//! stdout via `println!`. Operational telemetry goes to stderr via
//! tracing, so stdout remains clean for the actual results.

use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable output
    Pretty,
    /// Structured JSON lines
    Json,
}

#[derive(Error, Debug)]
pub enum LogInitError {
    #[error("failed to parse log filter: {0}")]
    Filter(String),

    #[error("failed to set global subscriber: {0}")]
    SetGlobal(String),
}

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` overrides the provided level when set. All output goes to
/// stderr.
///
/// # Errors
/// Returns [`LogInitError`] when the filter does not parse or a global
/// subscriber is already installed.
pub fn init(level: &str, format: LogFormat) -> Result<(), LogInitError> {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    let filter =
        EnvFilter::try_new(directives).map_err(|err| LogInitError::Filter(err.to_string()))?;

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .try_init()
            .map_err(|err| LogInitError::SetGlobal(err.to_string())),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()
            .map_err(|err| LogInitError::SetGlobal(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_second_global_subscriber_is_rejected() {
        let first = init("info", LogFormat::Pretty);
        let second = init("info", LogFormat::Json);
        // Whichever call came first installed the subscriber; the other
        // must fail instead of silently replacing it.
        assert!(first.is_ok() || matches!(first, Err(LogInitError::SetGlobal(_))));
        assert!(matches!(second, Err(LogInitError::SetGlobal(_))));
    }
}
