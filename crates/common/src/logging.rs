//! Logging and tracing setup.
//!
//! Structured logging via `tracing`; the filter comes from `RUST_LOG` and
//! defaults to `info`. Auth tokens must never be logged by callers.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with a human-readable compact format.
///
/// Usage:
/// ```rust,no_run
/// mission_common::init_tracing();
/// tracing::info!("Gateway starting on port 8910");
/// ```
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .compact(),
        )
        .init();
}

/// Initialize tracing with JSON output, for log aggregation systems.
pub fn init_tracing_json() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_level(true)
                .with_current_span(true),
        )
        .init();
}
