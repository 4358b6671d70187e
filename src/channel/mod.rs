//! Bounded FIFO channel with backpressure.
//!
//! A channel is a FIFO queue plus two wait-lists: suspended senders
//! (blocked on a full buffer) and suspended receivers (blocked on an empty
//! one). Values are delivered in send order; waiters resume in admission
//! order. Closing the channel wakes every waiter: suspended sends fail,
//! buffered values stay receivable until drained, after which receives
//! report `None`.
//!
//! ```
//! use custody::channel;
//! use custody::runtime::CoopRuntime;
//!
//! let rt = CoopRuntime::new();
//! let (tx, rx) = channel::bounded::<i32>(8);
//! rt.block_on(async move {
//!     tx.send(1).await.unwrap();
//!     tx.send(2).await.unwrap();
//!     tx.close();
//!     assert_eq!(rx.recv().await, Some(1));
//!     assert_eq!(rx.recv().await, Some(2));
//!     assert_eq!(rx.recv().await, None);
//! });
//! ```

use core::fmt;

mod bounded;

pub use bounded::{bounded, unbounded, Receiver, RecvFuture, SendFuture, Sender};

/// Error returned when sending on a closed channel.
///
/// Carries the value back so the caller can recover it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Recovers the value that could not be sent.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "send on closed channel")
    }
}

impl<T: fmt::Debug> std::error::Error for SendError<T> {}

/// Error returned by [`Sender::try_send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The buffer is at capacity; sending would suspend.
    Full(T),
    /// The channel is closed.
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Recovers the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Closed(value) => value,
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => write!(f, "channel full"),
            Self::Closed(_) => write!(f, "send on closed channel"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for TrySendError<T> {}

/// Error returned by [`Receiver::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// The buffer is empty; receiving would suspend.
    Empty,
    /// The channel is closed and fully drained.
    Closed,
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "channel empty"),
            Self::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for TryRecvError {}
