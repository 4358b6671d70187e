//! Lock primitives with runtime-checked discipline.
//!
//! - [`ExclusiveLock`]: asynchronous mutual exclusion; contending updates
//!   are dropped, not queued
//! - [`ReadWriteLock`]: multi-reader bookkeeping with immediate typed
//!   failures on contention
//! - [`SharedLockedCell`]: cloneable handles aliasing one lock-guarded
//!   value, with retrying asynchronous mutation
//!
//! All locks move through the same state machine:
//!
//! ```text
//! Unlocked -> (lock requested) -> Locked -> (complete | panic) -> Unlocked
//! ```
//!
//! There is no queued-waiter state: a caller that hits a held
//! [`ExclusiveLock`] or [`SharedLockedCell`] is skipped, and a caller that
//! hits a held [`ReadWriteLock`] gets an immediate [`LockError`]. This is
//! distinct from the channel's queuing behavior in [`crate::channel`].

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

mod exclusive;
mod rwlock;
mod shared;

pub use exclusive::ExclusiveLock;
pub use rwlock::{ReadGuard, ReadWriteLock};
pub use shared::{RetryPolicy, SharedLockedCell};

/// Error returned when a [`ReadWriteLock`] refuses an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// A read was refused because the value is write-locked.
    ReadContended,
    /// A write was refused because the value is locked or has readers.
    WriteContended,
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadContended => write!(f, "read refused: value is write-locked"),
            Self::WriteContended => write!(f, "write refused: value is locked or has readers"),
        }
    }
}

impl std::error::Error for LockError {}

/// Clears a lock flag on drop.
///
/// Keeping the release on a drop guard guarantees the
/// `Locked -> Unlocked` transition even when an updater panics.
pub(crate) struct ReleaseFlag<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ReleaseFlag<'a> {
    pub(crate) fn new(flag: &'a AtomicBool) -> Self {
        Self { flag }
    }
}

impl Drop for ReleaseFlag<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Returns true when lock state transitions should be traced.
pub(crate) fn trace_lock_events() -> bool {
    crate::config::global().trace_lock_events
}
