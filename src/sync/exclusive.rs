//! Asynchronous mutual-exclusion lock with drop-the-race contention.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{trace_lock_events, ReleaseFlag};
use crate::backend::{DualCell, RawCell};
use crate::tracing_compat::trace;

/// An asynchronous mutual-exclusion lock over a single value.
///
/// [`lock`](Self::lock) applies an (optionally asynchronous) updater to the
/// current value while holding the lock. A `lock` call that finds the lock
/// already held is a **silent no-op**: the updater is dropped, not queued.
/// Callers that need to detect contention check [`is_locked`](Self::is_locked)
/// first. This drop-the-race behavior is deliberate; see the module docs.
///
/// Reads through [`get`](Self::get) are lock-free and may observe a value
/// that an in-flight updater is about to replace.
///
/// # Example
///
/// ```
/// use custody::runtime::CoopRuntime;
/// use custody::sync::ExclusiveLock;
///
/// let rt = CoopRuntime::new();
/// let lock = ExclusiveLock::new(10);
/// rt.block_on(lock.lock(|v| async move { v + 1 }));
/// assert_eq!(lock.get(), 11);
/// ```
pub struct ExclusiveLock<T> {
    cell: DualCell<T>,
    locked: AtomicBool,
}

impl<T: std::fmt::Debug> std::fmt::Debug for ExclusiveLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusiveLock")
            .field("cell", &self.cell)
            .field("locked", &self.locked)
            .finish()
    }
}

impl<T: Clone + Send> ExclusiveLock<T> {
    /// Creates an unlocked lock holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            cell: DualCell::pure(value),
            locked: AtomicBool::new(false),
        }
    }

    /// Creates a lock whose value storage delegates to an acceleration
    /// backend, falling back to the pure path on any backend failure.
    #[must_use]
    pub fn with_backend(value: T, backend: Arc<dyn RawCell<T>>) -> Self {
        Self {
            cell: DualCell::accelerated(value, backend),
            locked: AtomicBool::new(false),
        }
    }

    /// Applies `updater` to the current value while holding the lock.
    ///
    /// If the lock is already held this returns immediately without
    /// applying the updater. Otherwise the updater is awaited on the
    /// current value and its result stored; the lock is released even if
    /// the updater panics (the value is then left unchanged).
    pub async fn lock<F, Fut>(&self, updater: F)
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = T>,
    {
        if self.locked.swap(true, Ordering::AcqRel) {
            if trace_lock_events() {
                trace!("exclusive lock contended; update dropped");
            }
            return;
        }

        let release = ReleaseFlag::new(&self.locked);
        if trace_lock_events() {
            trace!("exclusive lock acquired");
        }

        let current = self.cell.load();
        let updated = updater(current).await;
        self.cell.store(updated);

        drop(release);
        if trace_lock_events() {
            trace!("exclusive lock released");
        }
    }

    /// Returns the current value without any locking check.
    #[must_use]
    pub fn get(&self) -> T {
        self.cell.load()
    }

    /// Returns true while an update is in flight.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}
