//! Log output for tests.

use tracing_subscriber::{EnvFilter, fmt};

/// Installs a test-friendly `tracing` subscriber.
///
/// Honours `RUST_LOG` and defaults to `warn`. Output goes through the test
/// writer so it is captured per test. Safe to call from every test; only
/// the first call installs.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
}
