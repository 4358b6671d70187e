//! Cancellation token: the cooperative stop signal.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use crate::tracing_compat::debug;
use crate::types::CancelReason;

#[derive(Debug)]
struct TokenState {
    cancelled: AtomicBool,
    /// First cancellation wins; set before the flag is raised.
    reason: Mutex<Option<CancelReason>>,
    /// Waker slots for [`CancelledFuture`]s. `None` marks a vacated slot.
    wakers: Mutex<Vec<Option<Waker>>>,
}

/// A cloneable cancellation signal.
///
/// All clones share one state record. Cancellation is cooperative: raising
/// the signal does not preempt anything; computations observe it by
/// polling [`is_cancelled`](Self::is_cancelled) or awaiting
/// [`cancelled`](Self::cancelled) and are expected to stop themselves.
///
/// The flag is permanent: once cancelled, a token never resets, and the
/// first cancellation's reason wins.
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    /// Creates an unfired token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(TokenState {
                cancelled: AtomicBool::new(false),
                reason: Mutex::new(None),
                wakers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Requests cancellation with the default (user) reason.
    ///
    /// Returns true if this call performed the cancellation, false if the
    /// token was already fired.
    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelReason::default())
    }

    /// Requests cancellation with an explicit reason.
    ///
    /// Idempotent; the first caller's reason is kept and every waiter on
    /// [`cancelled`](Self::cancelled) is woken.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        let won = {
            let mut slot = lock_recovering(&self.state.reason);
            if slot.is_some() {
                false
            } else {
                *slot = Some(reason);
                true
            }
        };

        if won {
            self.state.cancelled.store(true, Ordering::Release);
            debug!("cancellation requested");
            let wakers = std::mem::take(&mut *lock_recovering(&self.state.wakers));
            for waker in wakers.into_iter().flatten() {
                waker.wake();
            }
        }
        won
    }

    /// Returns true once the token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Returns the cancellation reason, if the token has fired.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        lock_recovering(&self.state.reason).clone()
    }

    /// Returns a future that resolves with the reason once the token fires.
    ///
    /// This is the suspension point executors await to react to
    /// cancellation. Cancel-safe: dropping the future vacates its waker
    /// slot.
    #[must_use = "futures do nothing unless awaited"]
    pub fn cancelled(&self) -> CancelledFuture<'_> {
        CancelledFuture {
            token: self,
            slot: None,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Future returned by [`CancelToken::cancelled`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct CancelledFuture<'a> {
    token: &'a CancelToken,
    slot: Option<usize>,
}

impl Future for CancelledFuture<'_> {
    type Output = CancelReason;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            this.slot = None;
            return Poll::Ready(this.token.reason().unwrap_or_default());
        }

        let mut wakers = lock_recovering(&this.token.state.wakers);
        match this.slot {
            Some(index) => wakers[index] = Some(cx.waker().clone()),
            None => {
                wakers.push(Some(cx.waker().clone()));
                this.slot = Some(wakers.len() - 1);
            }
        }
        drop(wakers);

        // The token may have fired between the flag check and registration.
        if this.token.is_cancelled() {
            this.slot = None;
            return Poll::Ready(this.token.reason().unwrap_or_default());
        }
        Poll::Pending
    }
}

impl Drop for CancelledFuture<'_> {
    fn drop(&mut self) {
        if let Some(index) = self.slot {
            let mut wakers = lock_recovering(&self.token.state.wakers);
            if let Some(slot) = wakers.get_mut(index) {
                *slot = None;
            }
        }
    }
}
