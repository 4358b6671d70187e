//! Cloneable shared lock with retrying asynchronous mutation.

use core::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{trace_lock_events, ReleaseFlag};
use crate::backend::{DualCell, RawCell};
use crate::config;
use crate::tracing_compat::{trace, warn};

/// Retry policy for [`SharedLockedCell::set_async`].
///
/// `retries` bounds the number of updater attempts (at least one attempt
/// always runs). When every attempt fails, a supplied `fallback` converts
/// the final error into a replacement value; otherwise
/// the value is left unchanged and the error is returned to the caller.
/// Exhaustion is never silent.
pub struct RetryPolicy<T, E> {
    retries: u32,
    fallback: Option<Box<dyn FnOnce(E) -> T + Send>>,
}

impl<T, E> RetryPolicy<T, E> {
    /// Creates a policy with the configured default attempt budget and no
    /// fallback.
    #[must_use]
    pub fn new() -> Self {
        Self {
            retries: config::global().default_retries,
            fallback: None,
        }
    }

    /// Sets the attempt budget (clamped to at least one attempt).
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Supplies a fallback that recovers a value from the final error.
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl FnOnce(E) -> T + Send + 'static) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }
}

impl<T, E> Default for RetryPolicy<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for RetryPolicy<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("retries", &self.retries)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct CellState<T> {
    cell: DualCell<T>,
    locked: AtomicBool,
}

/// A cloneable handle to one lock-guarded value.
///
/// [`clone`](Clone::clone) yields a handle aliasing the **same** underlying
/// state record, not a deep copy: all clones observe the same lock flag and
/// value, and the record lives as long as the longest-lived clone. Mutation
/// through any clone is immediately visible to the others.
///
/// [`set`](Self::set) follows the same drop-the-race contention rule as
/// [`ExclusiveLock`](super::ExclusiveLock): a call that finds the lock held
/// skips the update silently.
///
/// # Example
///
/// ```
/// use custody::sync::SharedLockedCell;
///
/// let cell = SharedLockedCell::new(1);
/// let alias = cell.clone();
/// alias.set(|v| v + 1);
/// assert_eq!(cell.get(), 2);
/// ```
#[derive(Debug)]
pub struct SharedLockedCell<T> {
    shared: Arc<CellState<T>>,
}

impl<T> Clone for SharedLockedCell<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send> SharedLockedCell<T> {
    /// Creates a new shared cell holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            shared: Arc::new(CellState {
                cell: DualCell::pure(value),
                locked: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a shared cell whose value storage delegates to an
    /// acceleration backend, falling back to the pure path on failure.
    #[must_use]
    pub fn with_backend(value: T, backend: Arc<dyn RawCell<T>>) -> Self {
        Self {
            shared: Arc::new(CellState {
                cell: DualCell::accelerated(value, backend),
                locked: AtomicBool::new(false),
            }),
        }
    }

    /// Replaces the value with `f(current)` under the lock.
    ///
    /// Skips silently if the lock is already held.
    pub fn set(&self, f: impl FnOnce(T) -> T) {
        if self.shared.locked.swap(true, Ordering::AcqRel) {
            if trace_lock_events() {
                trace!("shared cell contended; update dropped");
            }
            return;
        }
        let release = ReleaseFlag::new(&self.shared.locked);

        let current = self.shared.cell.load();
        self.shared.cell.store(f(current));
        drop(release);
    }

    /// Replaces the value with the result of a retried asynchronous updater.
    ///
    /// The updater is attempted up to the policy's budget. On exhaustion the
    /// policy's fallback (if any) supplies the replacement value; without
    /// one, the value is left unchanged and the final error is returned.
    /// Skips silently (returning `Ok`) if the lock is already held; callers
    /// that need to detect contention check [`is_locked`](Self::is_locked).
    pub async fn set_async<F, Fut, E>(
        &self,
        mut updater: F,
        policy: RetryPolicy<T, E>,
    ) -> Result<(), E>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        if self.shared.locked.swap(true, Ordering::AcqRel) {
            if trace_lock_events() {
                trace!("shared cell contended; async update dropped");
            }
            return Ok(());
        }
        let release = ReleaseFlag::new(&self.shared.locked);

        let attempts = policy.retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            let current = self.shared.cell.load();
            match updater(current).await {
                Ok(next) => {
                    self.shared.cell.store(next);
                    drop(release);
                    return Ok(());
                }
                Err(error) => {
                    warn!(attempt, attempts, %error, "shared cell updater failed");
                    last_error = Some(error);
                }
            }
        }

        let error = last_error.expect("at least one attempt runs");
        match policy.fallback {
            Some(fallback) => {
                let replacement = fallback(error);
                self.shared.cell.store(replacement);
                drop(release);
                Ok(())
            }
            None => {
                drop(release);
                Err(error)
            }
        }
    }

    /// Returns the current value without any locking check.
    #[must_use]
    pub fn get(&self) -> T {
        self.shared.cell.load()
    }

    /// Returns true while an update is in flight on any clone.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.shared.locked.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::CoopRuntime;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn set_applies_updater() {
        let cell = SharedLockedCell::new(1);
        cell.set(|v| v + 1);
        assert_eq!(cell.get(), 2);
        assert!(!cell.is_locked());
    }

    #[test]
    fn clones_alias_one_state_record() {
        let cell = SharedLockedCell::new(String::from("a"));
        let alias = cell.clone();

        alias.set(|s| s + "b");
        assert_eq!(cell.get(), "ab");

        cell.set(|s| s + "c");
        assert_eq!(alias.get(), "abc");
    }

    #[test]
    fn set_async_succeeds_first_attempt() {
        crate::test_utils::init_test_logging();
        let rt = CoopRuntime::new();
        let cell = SharedLockedCell::new(10);

        let result = rt.block_on(cell.set_async(
            |v| async move { Ok::<_, String>(v * 2) },
            RetryPolicy::new(),
        ));
        assert_eq!(result, Ok(()));
        assert_eq!(cell.get(), 20);
    }

    #[test]
    fn set_async_retries_transient_failures() {
        crate::test_utils::init_test_logging();
        let rt = CoopRuntime::new();
        let cell = SharedLockedCell::new(10);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let result = rt.block_on(cell.set_async(
            move |v| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(String::from("not yet"))
                    } else {
                        Ok(v + 1)
                    }
                }
            },
            RetryPolicy::new().retries(3),
        ));

        assert_eq!(result, Ok(()));
        assert_eq!(cell.get(), 11);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!cell.is_locked());
    }

    #[test]
    fn set_async_exhaustion_surfaces_error() {
        crate::test_utils::init_test_logging();
        let rt = CoopRuntime::new();
        let cell = SharedLockedCell::new(10);

        let result = rt.block_on(cell.set_async(
            |_v| async move { Err::<i32, _>(String::from("broken")) },
            RetryPolicy::new().retries(2),
        ));

        assert_eq!(result, Err(String::from("broken")));
        assert_eq!(cell.get(), 10, "value unchanged after exhaustion");
        assert!(!cell.is_locked(), "lock released after exhaustion");
    }

    #[test]
    fn set_async_exhaustion_uses_fallback() {
        crate::test_utils::init_test_logging();
        let rt = CoopRuntime::new();
        let cell = SharedLockedCell::new(10);

        let result = rt.block_on(cell.set_async(
            |_v| async move { Err::<i32, _>(String::from("broken")) },
            RetryPolicy::new().retries(2).with_fallback(|_err| -1),
        ));

        assert_eq!(result, Ok(()));
        assert_eq!(cell.get(), -1);
    }

    #[test]
    fn contended_set_is_dropped() {
        let rt = CoopRuntime::new();
        let cell = SharedLockedCell::new(0);

        // Hold the lock via a suspended async update, then land a sync set
        // mid-flight.
        let holder = cell.clone();
        rt.spawn(async move {
            let _ = holder
                .set_async(
                    |v| async move {
                        crate::runtime::yield_now().await;
                        Ok::<_, String>(v + 1)
                    },
                    RetryPolicy::new(),
                )
                .await;
        });

        let contender = cell.clone();
        rt.spawn(async move {
            contender.set(|v| v + 100);
        });

        rt.run_until_stalled();
        assert_eq!(cell.get(), 1, "contending update was dropped");
    }

    #[test]
    fn retry_zero_still_attempts_once() {
        crate::test_utils::init_test_logging();
        let rt = CoopRuntime::new();
        let cell = SharedLockedCell::new(1);

        let result = rt.block_on(cell.set_async(
            |v| async move { Ok::<_, String>(v + 1) },
            RetryPolicy::new().retries(0),
        ));
        assert_eq!(result, Ok(()));
        assert_eq!(cell.get(), 2);
    }
}
