//! tracing subscriber setup.

use std::sync::Once;

use tracing::debug;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

static TEST_SETUP: Once = Once::new();

/// Install a stderr `fmt` layer filtered by `RUST_LOG`, falling back to
/// `default_filter`. A second call is a no-op.
pub fn init(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = tracing_subscriber::registry().with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(env_filter),
    );

    if tracing::dispatcher::has_been_set() {
        debug!("tracing subscriber already set");
    } else if let Err(e) = subscriber.try_init() {
        eprintln!("Error: failed to set up logging: {}", e);
    }
}

/// Logging for tests: everything at `debug` unless `RUST_LOG` says otherwise.
pub fn init_test_setup() {
    TEST_SETUP.call_once(|| {
        init("debug");
        debug!("test setup complete");
    });
}
