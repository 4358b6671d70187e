//! Read-write lock with immediate typed failures on contention.

use std::ops::Deref;
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard};

use super::{trace_lock_events, LockError};
use crate::tracing_compat::trace;

#[derive(Debug)]
struct RwState {
    readers: usize,
    locked: bool,
}

/// Clears the write-lock flag on drop, so a panicking updater still
/// restores the `Unlocked` state.
struct ReleaseState<'a, T> {
    lock: &'a ReadWriteLock<T>,
}

impl<'a, T> ReleaseState<'a, T> {
    fn new(lock: &'a ReadWriteLock<T>) -> Self {
        Self { lock }
    }
}

impl<T> Drop for ReleaseState<'_, T> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

/// A read-write lock that refuses contended operations instead of queuing.
///
/// Invariant: `locked` and `readers > 0` are mutually exclusive. A
/// [`read`](Self::read) while write-locked fails with
/// [`LockError::ReadContended`]; a [`write`](Self::write) while locked or
/// while readers exist fails with [`LockError::WriteContended`]. Failed
/// calls never corrupt state.
///
/// # Example
///
/// ```
/// use custody::sync::ReadWriteLock;
///
/// let lock = ReadWriteLock::new(String::from("a"));
/// {
///     let guard = lock.read().unwrap();
///     assert_eq!(&*guard, "a");
///     assert!(lock.write(|s| s + "b").is_err()); // readers present
/// }
/// lock.write(|s| s + "b").unwrap();
/// assert_eq!(lock.read().unwrap().clone(), "ab");
/// ```
#[derive(Debug)]
pub struct ReadWriteLock<T> {
    /// The protected data.
    data: RwLock<T>,
    /// Reader/writer bookkeeping.
    state: Mutex<RwState>,
}

impl<T> ReadWriteLock<T> {
    /// Creates an unlocked read-write lock holding `value`.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            data: RwLock::new(value),
            state: Mutex::new(RwState {
                readers: 0,
                locked: false,
            }),
        }
    }

    /// Acquires shared read access.
    ///
    /// Increments the reader count and returns a guard; dropping the guard
    /// releases the read.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::ReadContended`] if a write is in progress.
    pub fn read(&self) -> Result<ReadGuard<'_, T>, LockError> {
        {
            let mut state = self.lock_state();
            if state.locked {
                if trace_lock_events() {
                    trace!("read refused: write in progress");
                }
                return Err(LockError::ReadContended);
            }
            state.readers += 1;
        }

        let guard = self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(ReadGuard { lock: self, guard })
    }

    /// Replaces the value with `f(current)` under the write lock.
    ///
    /// The updater runs synchronously; the lock is released even if it
    /// panics (the value is then left unchanged).
    ///
    /// # Errors
    ///
    /// Returns [`LockError::WriteContended`] if the lock is held or any
    /// readers exist.
    pub fn write(&self, f: impl FnOnce(T) -> T) -> Result<(), LockError>
    where
        T: Clone,
    {
        {
            let mut state = self.lock_state();
            if state.locked || state.readers > 0 {
                if trace_lock_events() {
                    trace!(
                        readers = state.readers,
                        locked = state.locked,
                        "write refused"
                    );
                }
                return Err(LockError::WriteContended);
            }
            state.locked = true;
        }

        let release = ReleaseState::new(self);
        {
            let mut slot = self.data.write().unwrap_or_else(PoisonError::into_inner);
            let current = slot.clone();
            *slot = f(current);
        }
        drop(release);
        Ok(())
    }

    /// Returns the current reader count.
    #[must_use]
    pub fn readers(&self) -> usize {
        self.lock_state().readers
    }

    /// Returns true while a write is in progress.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock_state().locked
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RwState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_read(&self) {
        let mut state = self.lock_state();
        state.readers = state.readers.saturating_sub(1);
    }

    fn release_write(&self) {
        self.lock_state().locked = false;
    }
}

impl<T: Default> Default for ReadWriteLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Shared read access to a [`ReadWriteLock`].
///
/// Dropping the guard releases the read; the reader count never goes
/// negative because each guard releases exactly once.
#[must_use = "guard will be immediately released if not held"]
pub struct ReadGuard<'a, T> {
    lock: &'a ReadWriteLock<T>,
    guard: RwLockReadGuard<'a, T>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for ReadGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadGuard")
            .field("data", &*self.guard)
            .finish()
    }
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}
