//! Tracing initialization for embedders.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber with a fallback filter directive.
///
/// `RUST_LOG` wins when it is set; otherwise `default_directive` applies
/// (e.g. `"info"` or `"squall=debug"`).
pub fn init_tracing_with(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Install the global tracing subscriber, defaulting to `info` level.
pub fn init_tracing() {
    init_tracing_with("info");
}
