use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();

/// Route runtime logs to the test output, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs the subscriber.
/// Does nothing when another global subscriber is already set.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let installed = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(filter)
            .try_init();
        if installed.is_ok() {
            tracing::debug!("test logging initialized");
        }
    });
}
