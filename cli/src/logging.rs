//! Tracing/logging initialization.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber with an env-filter.
///
/// `default_filter` is the filter used when `RUST_LOG` is not set
/// (e.g. `"info"` or `"portward=debug"`).
pub fn init_tracing(default_filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
