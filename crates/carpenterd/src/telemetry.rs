//! Tracing setup.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// Development gets human-readable output, every other environment gets
/// JSON lines. `RUST_LOG` overrides the default `info` filter.
pub fn init(development: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if development {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_env_filter(filter)
            .init();
    }
}
