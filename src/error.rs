//! Error types and error handling strategy for custody.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Ownership and channel errors are surfaced to the immediate caller
//! - Task failures travel through the [`Outcome`](crate::types::Outcome)
//!   type and are only observed when the task is awaited
//! - Errors are classified by recoverability for retry logic
//!
//! Nothing in this crate is fatal to the process: every failure is either a
//! value or an error scoped to the calling computation.

use core::fmt;

use crate::channel::{TryRecvError, TrySendError};
use crate::guard::OwnershipError;
use crate::sync::LockError;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Ownership ===
    /// A move-once container was accessed after its value was taken.
    Consumed,
    /// A read/write handle was used after revocation.
    HandleRevoked,

    // === Locks ===
    /// A read was refused because the value is write-locked.
    ReadContended,
    /// A write was refused because the value is locked or has readers.
    WriteContended,

    // === Channels ===
    /// Channel is closed.
    ChannelClosed,
    /// Channel is full (would suspend).
    ChannelFull,
    /// Channel is empty (would suspend).
    ChannelEmpty,

    // === Tasks ===
    /// Operation was cancelled.
    Cancelled,
    /// A retrying update exhausted its attempts.
    RetriesExhausted,

    // === Internal ===
    /// Internal runtime error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Consumed | Self::HandleRevoked => ErrorCategory::Ownership,
            Self::ReadContended | Self::WriteContended => ErrorCategory::Lock,
            Self::ChannelClosed | Self::ChannelFull | Self::ChannelEmpty => ErrorCategory::Channel,
            Self::Cancelled | Self::RetriesExhausted => ErrorCategory::Task,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Returns the recoverability classification for this error kind.
    ///
    /// This helps retry logic decide whether to attempt recovery.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            // Transient: the condition clears once the holder releases
            // or the queue drains.
            Self::ReadContended | Self::WriteContended | Self::ChannelFull | Self::ChannelEmpty => {
                Recoverability::Transient
            }

            // Permanent: the state transition is final.
            Self::Consumed | Self::HandleRevoked | Self::ChannelClosed | Self::Cancelled => {
                Recoverability::Permanent
            }

            // Context-dependent.
            Self::RetriesExhausted | Self::Internal => Recoverability::Unknown,
        }
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Consumed => "value already consumed",
            Self::HandleRevoked => "handle revoked",
            Self::ReadContended => "read contended",
            Self::WriteContended => "write contended",
            Self::ChannelClosed => "channel closed",
            Self::ChannelFull => "channel full",
            Self::ChannelEmpty => "channel empty",
            Self::Cancelled => "cancelled",
            Self::RetriesExhausted => "retries exhausted",
            Self::Internal => "internal error",
        };
        write!(f, "{name}")
    }
}

/// High-level error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Ownership guard violations.
    Ownership,
    /// Lock discipline violations.
    Lock,
    /// Channel communication errors.
    Channel,
    /// Task lifecycle errors.
    Task,
    /// Runtime bugs and invalid states.
    Internal,
}

/// Classification of whether an error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure, safe to retry.
    Transient,
    /// Unrecoverable, do not retry.
    Permanent,
    /// Recoverability depends on context.
    Unknown,
}

/// The central error type.
///
/// Module-local error enums ([`OwnershipError`], [`LockError`], channel
/// errors) convert into this type for callers that aggregate failures
/// across primitives.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Attaches a human-readable message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the category of this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the recoverability of this error.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}

/// Result alias using the central [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

impl From<OwnershipError> for Error {
    fn from(err: OwnershipError) -> Self {
        match err {
            OwnershipError::Consumed => Self::new(ErrorKind::Consumed),
            OwnershipError::Revoked => Self::new(ErrorKind::HandleRevoked),
        }
    }
}

impl From<LockError> for Error {
    fn from(err: LockError) -> Self {
        match err {
            LockError::ReadContended => Self::new(ErrorKind::ReadContended),
            LockError::WriteContended => Self::new(ErrorKind::WriteContended),
        }
    }
}

impl<T> From<TrySendError<T>> for Error {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => Self::new(ErrorKind::ChannelFull),
            TrySendError::Closed(_) => Self::new(ErrorKind::ChannelClosed),
        }
    }
}

impl From<TryRecvError> for Error {
    fn from(err: TryRecvError) -> Self {
        match err {
            TryRecvError::Empty => Self::new(ErrorKind::ChannelEmpty),
            TryRecvError::Closed => Self::new(ErrorKind::ChannelClosed),
        }
    }
}
