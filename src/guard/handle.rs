//! Revocable read and write handles.

use std::sync::{Mutex, PoisonError};

use super::OwnershipError;

/// Shared slot implementation behind both handle types.
///
/// `None` means the handle has been revoked. Revocation is idempotent.
#[derive(Debug)]
struct ActiveSlot<T> {
    slot: Mutex<Option<T>>,
}

impl<T> ActiveSlot<T> {
    const fn new(value: T) -> Self {
        Self {
            slot: Mutex::new(Some(value)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, OwnershipError> {
        self.lock().as_ref().map(f).ok_or(OwnershipError::Revoked)
    }

    fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    fn revoke(&self) {
        self.lock().take();
    }
}

/// A revocable handle granting checked read access to a value.
///
/// Once [`revoke`](Self::revoke) has been called, every access fails with
/// [`OwnershipError::Revoked`]. Revoking twice is a no-op.
///
/// # Example
///
/// ```
/// use custody::guard::ReadHandle;
///
/// let handle = ReadHandle::new(7);
/// assert_eq!(handle.get().unwrap(), 7);
///
/// handle.revoke();
/// assert!(handle.get().is_err());
/// handle.revoke(); // idempotent
/// ```
#[derive(Debug)]
pub struct ReadHandle<T> {
    inner: ActiveSlot<T>,
}

impl<T> ReadHandle<T> {
    /// Creates an active read handle over `value`.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            inner: ActiveSlot::new(value),
        }
    }

    /// Runs `f` with shared access to the held value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, OwnershipError> {
        self.inner.with(f)
    }

    /// Returns a clone of the held value.
    pub fn get(&self) -> Result<T, OwnershipError>
    where
        T: Clone,
    {
        self.inner.with(Clone::clone)
    }

    /// Returns true while the handle has not been revoked.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Idempotently deactivates the handle.
    pub fn revoke(&self) {
        self.inner.revoke();
    }
}

/// A revocable handle granting checked read and write access to a value.
///
/// Carries everything [`ReadHandle`] does plus [`update`](Self::update),
/// which replaces the held value while the handle is active.
#[derive(Debug)]
pub struct WriteHandle<T> {
    inner: ActiveSlot<T>,
}

impl<T> WriteHandle<T> {
    /// Creates an active write handle over `value`.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            inner: ActiveSlot::new(value),
        }
    }

    /// Runs `f` with shared access to the held value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, OwnershipError> {
        self.inner.with(f)
    }

    /// Returns a clone of the held value.
    pub fn get(&self) -> Result<T, OwnershipError>
    where
        T: Clone,
    {
        self.inner.with(Clone::clone)
    }

    /// Replaces the held value with `f(current)`.
    pub fn update(&self, f: impl FnOnce(T) -> T) -> Result<(), OwnershipError> {
        let mut guard = self.inner.lock();
        let current = guard.take().ok_or(OwnershipError::Revoked)?;
        *guard = Some(f(current));
        Ok(())
    }

    /// Returns true while the handle has not been revoked.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Idempotently deactivates the handle.
    pub fn revoke(&self) {
        self.inner.revoke();
    }
}
