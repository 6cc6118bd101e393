//! Tracing Initialization
//!
//! Installs a `tracing-subscriber` registry filtered by `RUST_LOG`, writing
//! either JSON lines or human-readable output.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::constants::DEFAULT_LOG_FILTER;

/// The filter in effect: `RUST_LOG` if it parses, otherwise
/// [`DEFAULT_LOG_FILTER`].
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Initialize the global tracing subscriber.
///
/// Should be called once at startup before any tracing occurs. Fails if a
/// global subscriber is already installed.
pub fn init_tracing(json: bool) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(env_filter());

    if json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }

    tracing::info!(json, "Tracing initialized");
    Ok(())
}
