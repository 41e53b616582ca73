//! Logging setup
//!
//! The subscriber is installed once by the binary. Library components never
//! reach for a global logger: each one is handed a [`tracing::Span`] when it
//! is built and parents its events on it, so tests can capture or silence a
//! single component.

use tracing::{Level, Span};
use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber, honouring `RUST_LOG`
pub fn init(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();
}

/// Root span for a component
pub fn component_span(component: &'static str) -> Span {
    tracing::info_span!("exporter", component)
}

/// Child span for one feed of a run
pub fn feed_span(parent: &Span, feed: &str, org_id: &str) -> Span {
    tracing::info_span!(parent: parent, "feed", feed, org_id)
}
