//! `tracing` subscriber setup for the binary.
//!
//! Filtering follows `RUST_LOG` and defaults to `info`, for example
//! `RUST_LOG=bookshelf::cache=debug`.

use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

#[derive(Debug, Error)]
#[error("failed to initialize tracing: {0}")]
pub struct LoggingError(#[from] tracing_subscriber::util::TryInitError);

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`LoggingError`] if a global subscriber is already set.
pub fn init(format: LogFormat) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init()?,
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init()?,
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()?,
    }
    Ok(())
}
