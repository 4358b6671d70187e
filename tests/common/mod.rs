//! Shared helpers for integration tests.

use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Initialize tracing output for a test binary. Idempotent.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
            .with_test_writer()
            .with_ansi(false)
            .try_init();
    });
}
