//! Acceleration backend contract for lock-guarded value storage.
//!
//! Every value-passing lock primitive ([`ExclusiveLock`](crate::sync::ExclusiveLock),
//! [`SharedLockedCell`](crate::sync::SharedLockedCell)) stores its value in a
//! [`DualCell`], which can delegate loads and stores to an installed
//! [`RawCell`] backend. The contract:
//!
//! - The backend exposes the same operation set as the pure path
//!   (construct, load, store; clone and drop map onto `Arc` semantics)
//! - Any backend error is logged as a warning and the cell **permanently
//!   latches to the pure path**, re-running the failed operation there
//! - Every successful accelerated store is mirrored into the pure cell, so
//!   the fallback never loses state
//!
//! Callers observe identical outcomes on both paths, only latency variance.

use std::sync::{Arc, Mutex, PoisonError};

use crate::config;
use crate::tracing_compat::{debug, warn};

/// Errors surfaced by an acceleration backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend is not available (not loaded, wrong platform, torn down).
    #[error("acceleration backend unavailable")]
    Unavailable,
    /// A delegated operation failed.
    #[error("backend operation {op} failed: {detail}")]
    OperationFailed {
        /// The operation that failed (`"load"` or `"store"`).
        op: &'static str,
        /// Backend-specific detail.
        detail: String,
    },
}

/// The delegation contract an acceleration backend implements.
///
/// A backend holds one value slot. Construction happens through whatever
/// factory produced the `Arc<dyn RawCell<T>>`; cloning and dropping the slot
/// are `Arc` clone and drop.
pub trait RawCell<T>: Send + Sync {
    /// Reads the current value.
    fn load(&self) -> Result<T, BackendError>;

    /// Replaces the current value.
    fn store(&self, value: T) -> Result<(), BackendError>;
}

/// The pure reference implementation of [`RawCell`]: a mutex-guarded slot.
#[derive(Debug)]
pub struct PureCell<T> {
    slot: Mutex<T>,
}

impl<T> PureCell<T> {
    /// Creates a pure cell holding `value`.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            slot: Mutex::new(value),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, T> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads the current value.
    pub fn load(&self) -> T
    where
        T: Clone,
    {
        self.lock().clone()
    }

    /// Replaces the current value.
    pub fn store(&self, value: T) {
        *self.lock() = value;
    }
}

impl<T: Clone + Send> RawCell<T> for PureCell<T> {
    fn load(&self) -> Result<T, BackendError> {
        Ok(PureCell::load(self))
    }

    fn store(&self, value: T) -> Result<(), BackendError> {
        PureCell::store(self, value);
        Ok(())
    }
}

/// A value slot that prefers an accelerated backend and falls back to the
/// pure path on any delegation failure.
pub struct DualCell<T> {
    /// Authoritative mirror; always kept in sync on successful stores.
    pure: PureCell<T>,
    /// Installed accelerator; cleared permanently on first failure.
    accel: Mutex<Option<Arc<dyn RawCell<T>>>>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for DualCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualCell")
            .field("pure", &self.pure)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send> DualCell<T> {
    /// Creates a cell on the pure path.
    #[must_use]
    pub fn pure(value: T) -> Self {
        Self {
            pure: PureCell::new(value),
            accel: Mutex::new(None),
        }
    }

    /// Creates a cell that delegates to `backend`.
    ///
    /// The initial value is written through immediately; if that write
    /// fails, or the process config disables backends, the cell starts on
    /// the pure path instead.
    #[must_use]
    pub fn accelerated(value: T, backend: Arc<dyn RawCell<T>>) -> Self {
        if !config::global().backend_enabled {
            debug!("acceleration backends disabled by config; using pure path");
            return Self::pure(value);
        }
        match backend.store(value.clone()) {
            Ok(()) => Self {
                pure: PureCell::new(value),
                accel: Mutex::new(Some(backend)),
            },
            Err(error) => {
                warn!(%error, "backend rejected initial store; using pure path");
                Self::pure(value)
            }
        }
    }

    /// Returns true while the accelerated path is live.
    #[must_use]
    pub fn is_accelerated(&self) -> bool {
        self.accel_handle().is_some()
    }

    /// Reads the current value.
    pub fn load(&self) -> T {
        if let Some(backend) = self.accel_handle() {
            match backend.load() {
                Ok(value) => return value,
                Err(error) => self.demote("load", &error),
            }
        }
        self.pure.load()
    }

    /// Replaces the current value.
    pub fn store(&self, value: T) {
        if let Some(backend) = self.accel_handle() {
            match backend.store(value.clone()) {
                Ok(()) => {
                    // Mirror so a later demotion observes the same state.
                    self.pure.store(value);
                    return;
                }
                Err(error) => self.demote("store", &error),
            }
        }
        self.pure.store(value);
    }

    fn accel_handle(&self) -> Option<Arc<dyn RawCell<T>>> {
        self.accel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn demote(&self, op: &'static str, error: &BackendError) {
        warn!(%error, op, "acceleration backend failed; falling back to pure path");
        *self.accel.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Backend that can be toggled to fail on demand.
    struct FlakyCell {
        slot: Mutex<Option<i32>>,
        fail: AtomicBool,
        stores: AtomicUsize,
    }

    impl FlakyCell {
        fn new() -> Self {
            Self {
                slot: Mutex::new(None),
                fail: AtomicBool::new(false),
                stores: AtomicUsize::new(0),
            }
        }
    }

    impl RawCell<i32> for FlakyCell {
        fn load(&self) -> Result<i32, BackendError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(BackendError::Unavailable);
            }
            self.slot
                .lock()
                .expect("slot lock")
                .ok_or(BackendError::Unavailable)
        }

        fn store(&self, value: i32) -> Result<(), BackendError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(BackendError::OperationFailed {
                    op: "store",
                    detail: "injected failure".to_string(),
                });
            }
            self.stores.fetch_add(1, Ordering::SeqCst);
            *self.slot.lock().expect("slot lock") = Some(value);
            Ok(())
        }
    }

    #[test]
    fn pure_cell_round_trip() {
        let cell = PureCell::new(1);
        assert_eq!(cell.load(), 1);
        cell.store(2);
        assert_eq!(cell.load(), 2);
    }

    #[test]
    fn accelerated_path_serves_reads() {
        crate::test_utils::init_test_logging();
        let backend = Arc::new(FlakyCell::new());
        let cell = DualCell::accelerated(10, Arc::clone(&backend) as Arc<dyn RawCell<i32>>);

        assert!(cell.is_accelerated());
        assert_eq!(cell.load(), 10);
        cell.store(11);
        assert_eq!(cell.load(), 11);
        assert!(backend.stores.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn failing_backend_falls_back_without_losing_state() {
        crate::test_utils::init_test_logging();
        let backend = Arc::new(FlakyCell::new());
        let cell = DualCell::accelerated(10, Arc::clone(&backend) as Arc<dyn RawCell<i32>>);

        cell.store(42);
        backend.fail.store(true, Ordering::SeqCst);

        // The failed load demotes and answers from the mirror.
        assert_eq!(cell.load(), 42);
        assert!(!cell.is_accelerated());

        // Later operations stay on the pure path even after the backend
        // recovers.
        backend.fail.store(false, Ordering::SeqCst);
        cell.store(43);
        assert_eq!(cell.load(), 43);
        assert!(!cell.is_accelerated());
    }

    #[test]
    fn rejected_initial_store_starts_pure() {
        crate::test_utils::init_test_logging();
        let backend = Arc::new(FlakyCell::new());
        backend.fail.store(true, Ordering::SeqCst);

        let cell = DualCell::accelerated(5, Arc::clone(&backend) as Arc<dyn RawCell<i32>>);
        assert!(!cell.is_accelerated());
        assert_eq!(cell.load(), 5);
    }
}
