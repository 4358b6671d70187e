//! Shared helpers for unit tests.
//!
//! - Consistent tracing-based logging initialization
//! - A global environment lock for tests that mutate env vars

use std::sync::{Mutex, Once};

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once. Also pins the
/// process-wide config to its defaults so tests that mutate `CUSTODY_*`
/// env vars cannot race the lazy config initialization.
pub fn init_test_logging() {
    let _ = crate::config::init(crate::config::CoreConfig::default());
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing_subscriber::filter::LevelFilter::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
///
/// Recovers from poisoning so one failed test does not wedge the rest.
pub fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
