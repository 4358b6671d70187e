//! Cancellable tasks with monadic combinators.
//!
//! A [`CancellableTask`] wraps one asynchronous computation together with a
//! [`CancelToken`] and settles exactly once: every awaiter of
//! [`run`](CancellableTask::run) observes the same outcome, and the
//! computation is never re-executed. Combinators ([`map`](CancellableTask::map),
//! [`flat_map`](CancellableTask::flat_map), [`catch`](CancellableTask::catch),
//! [`all`](CancellableTask::all)) compose settled results without re-running
//! completed work.
//!
//! Cancellation is cooperative: [`cancel`](CancellableTask::cancel) fires
//! the token and, if the task has not settled, settles it with a
//! cancellation outcome and drops the in-flight computation so its
//! resources release through `Drop`.
//!
//! ```
//! use custody::runtime::CoopRuntime;
//! use custody::task::CancellableTask;
//! use custody::types::Outcome;
//!
//! let rt = CoopRuntime::new();
//! let task: CancellableTask<i32, String> =
//!     CancellableTask::new(|_token| async move { Outcome::Ok(20) });
//! let doubled = task.map(|v| v * 2);
//! assert_eq!(rt.block_on(doubled.run()), Outcome::Ok(40));
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

mod token;

pub use token::{CancelToken, CancelledFuture};

use crate::tracing_compat::debug;
use crate::types::{CancelReason, Outcome};

type TaskFuture<T, E> = Pin<Box<dyn Future<Output = Outcome<T, E>> + Send>>;

enum TaskState<T, E> {
    /// The computation has not settled. `future` is `None` while an awaiter
    /// is actively polling it.
    Running {
        future: Option<TaskFuture<T, E>>,
        /// Waker slots for awaiters; `None` marks a vacated slot.
        waiters: Vec<Option<Waker>>,
    },
    /// Terminal: every `run()` observes this outcome.
    Settled(Outcome<T, E>),
}

struct TaskInner<T, E> {
    state: Mutex<TaskState<T, E>>,
    token: CancelToken,
}

impl<T, E> TaskInner<T, E> {
    fn lock(&self) -> MutexGuard<'_, TaskState<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A cancellable, settle-once asynchronous computation.
///
/// Cloning yields another handle to the same underlying task.
pub struct CancellableTask<T, E> {
    inner: Arc<TaskInner<T, E>>,
}

impl<T, E> Clone for CancellableTask<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> std::fmt::Debug for CancellableTask<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellableTask")
            .field("settled", &self.is_settled())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<T, E> CancellableTask<T, E> {
    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Returns true once the task has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(&*self.inner.lock(), TaskState::Settled(_))
    }
}

impl<T, E> CancellableTask<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates a task from an executor.
    ///
    /// The executor receives the task's [`CancelToken`] so it can observe
    /// cancellation at its own suspension points. The computation is driven
    /// by the first [`run`](Self::run) awaiter and settles exactly once.
    pub fn new<F, Fut>(executor: F) -> Self
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = Outcome<T, E>> + Send + 'static,
    {
        let token = CancelToken::new();
        let future: TaskFuture<T, E> = Box::pin(executor(token.clone()));
        Self::from_parts(token, future)
    }

    /// Creates a task already settled with `outcome`.
    #[must_use]
    pub fn from_outcome(outcome: Outcome<T, E>) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                state: Mutex::new(TaskState::Settled(outcome)),
                token: CancelToken::new(),
            }),
        }
    }

    /// Creates a task settled with a success value.
    #[must_use]
    pub fn resolve(value: T) -> Self {
        Self::from_outcome(Outcome::Ok(value))
    }

    /// Creates a task settled with a failure.
    #[must_use]
    pub fn reject(error: E) -> Self {
        Self::from_outcome(Outcome::Err(error))
    }

    /// Wraps an already-constructed future with an existing token; used by
    /// the combinators so a chain shares one cancellation signal.
    fn with_token<Fut>(token: CancelToken, future: Fut) -> Self
    where
        Fut: Future<Output = Outcome<T, E>> + Send + 'static,
    {
        Self::from_parts(token, Box::pin(future))
    }

    fn from_parts(token: CancelToken, future: TaskFuture<T, E>) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                state: Mutex::new(TaskState::Running {
                    future: Some(future),
                    waiters: Vec::new(),
                }),
                token,
            }),
        }
    }

    /// Awaits the task's outcome.
    ///
    /// May be awaited any number of times, from any number of handles: the
    /// first awaiter drives the computation, the rest wait, and everyone
    /// observes the same settled outcome. Settled results never re-execute.
    #[must_use = "futures do nothing unless awaited"]
    pub fn run(&self) -> RunFuture<T, E> {
        RunFuture {
            inner: Arc::clone(&self.inner),
            slot: None,
        }
    }

    /// Returns the outcome if the task has settled.
    #[must_use]
    pub fn try_outcome(&self) -> Option<Outcome<T, E>> {
        match &*self.inner.lock() {
            TaskState::Settled(outcome) => Some(outcome.clone()),
            TaskState::Running { .. } => None,
        }
    }

    /// Requests cancellation with the default (user) reason.
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::default());
    }

    /// Requests cancellation with an explicit reason.
    ///
    /// Idempotent. Fires the token and, if the task has not settled,
    /// settles it with `Outcome::Cancelled` and drops the in-flight
    /// computation so held resources release through `Drop`. A task that
    /// already settled keeps its outcome.
    pub fn cancel_with(&self, reason: CancelReason) {
        self.inner.token.cancel_with(reason.clone());

        let (dropped, waiters) = {
            let mut state = self.inner.lock();
            match &mut *state {
                TaskState::Settled(_) => (None, Vec::new()),
                TaskState::Running { future, waiters } => {
                    let future = future.take();
                    let waiters = std::mem::take(waiters);
                    *state = TaskState::Settled(Outcome::Cancelled(reason));
                    (future, waiters)
                }
            }
        };

        if dropped.is_some() {
            debug!("task cancelled before settling");
        }
        // Drop the computation outside the state lock; its Drop may touch
        // other primitives.
        drop(dropped);
        for waker in waiters.into_iter().flatten() {
            waker.wake();
        }
    }

    /// Returns this task's cancellation token.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        self.inner.token.clone()
    }

    /// Returns a task that applies `f` to the success value.
    ///
    /// Failures and cancellations short-circuit without invoking `f`. The
    /// derived task shares this task's cancellation token.
    #[must_use]
    pub fn map<U, F>(&self, f: F) -> CancellableTask<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let source = self.clone();
        CancellableTask::with_token(self.inner.token.clone(), async move {
            match source.run().await {
                Outcome::Ok(value) => Outcome::Ok(f(value)),
                Outcome::Err(error) => Outcome::Err(error),
                Outcome::Cancelled(reason) => Outcome::Cancelled(reason),
            }
        })
    }

    /// Returns a task that, on success, runs the task produced by `f` and
    /// adopts its outcome.
    ///
    /// Failures and cancellations short-circuit without invoking `f`. The
    /// derived task shares this task's cancellation token.
    #[must_use]
    pub fn flat_map<U, F>(&self, f: F) -> CancellableTask<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> CancellableTask<U, E> + Send + 'static,
    {
        let source = self.clone();
        CancellableTask::with_token(self.inner.token.clone(), async move {
            match source.run().await {
                Outcome::Ok(value) => f(value).run().await,
                Outcome::Err(error) => Outcome::Err(error),
                Outcome::Cancelled(reason) => Outcome::Cancelled(reason),
            }
        })
    }

    /// Returns a task that recovers failures through `f`.
    ///
    /// `f` may produce a success or a different failure. Successes pass
    /// through untouched; cancellations are not catchable and pass through
    /// as cancellations.
    #[must_use]
    pub fn catch<F>(&self, f: F) -> CancellableTask<T, E>
    where
        F: FnOnce(E) -> Outcome<T, E> + Send + 'static,
    {
        let source = self.clone();
        CancellableTask::with_token(self.inner.token.clone(), async move {
            match source.run().await {
                Outcome::Ok(value) => Outcome::Ok(value),
                Outcome::Err(error) => f(error),
                Outcome::Cancelled(reason) => Outcome::Cancelled(reason),
            }
        })
    }

    /// Waits for every task and collects their success values in order.
    ///
    /// All tasks are driven concurrently and every one is awaited to its
    /// outcome. If any task did not succeed, the result is the first
    /// non-success **in input order**, not completion order. Cancelling
    /// the aggregate does not cancel the input tasks.
    #[must_use]
    pub fn all(tasks: Vec<Self>) -> CancellableTask<Vec<T>, E> {
        let runs: Vec<RunFuture<T, E>> = tasks.iter().map(Self::run).collect();
        let outcomes = (0..runs.len()).map(|_| None).collect();
        CancellableTask::new(move |_token| AllFuture { runs, outcomes })
    }
}

/// Future returned by [`CancellableTask::run`].
///
/// Holds its own handle to the task, so it remains valid after the
/// originating handle is dropped.
#[must_use = "futures do nothing unless awaited"]
pub struct RunFuture<T, E> {
    inner: Arc<TaskInner<T, E>>,
    slot: Option<usize>,
}

impl<T, E> RunFuture<T, E> {
    fn register(slot: &mut Option<usize>, state: &mut TaskState<T, E>, waker: &Waker) {
        if let TaskState::Running { waiters, .. } = state {
            match *slot {
                Some(index) => waiters[index] = Some(waker.clone()),
                None => {
                    waiters.push(Some(waker.clone()));
                    *slot = Some(waiters.len() - 1);
                }
            }
        }
    }
}

impl<T, E> Future for RunFuture<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Outcome<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        // Phase 1: settle fast, or claim the computation for driving.
        let mut future = {
            let mut state = this.inner.lock();
            match &mut *state {
                TaskState::Settled(outcome) => {
                    this.slot = None;
                    return Poll::Ready(outcome.clone());
                }
                TaskState::Running { future, .. } => match future.take() {
                    Some(future) => future,
                    None => {
                        // Another awaiter is driving; wait for the settle.
                        Self::register(&mut this.slot, &mut state, cx.waker());
                        return Poll::Pending;
                    }
                },
            }
        };

        // Phase 2: drive the computation without holding the state lock.
        match future.as_mut().poll(cx) {
            Poll::Ready(outcome) => {
                let waiters = {
                    let mut state = this.inner.lock();
                    match &mut *state {
                        // A cancel landed mid-poll; its outcome wins and the
                        // computation is dropped here.
                        TaskState::Settled(existing) => {
                            this.slot = None;
                            return Poll::Ready(existing.clone());
                        }
                        TaskState::Running { waiters, .. } => {
                            let waiters = std::mem::take(waiters);
                            *state = TaskState::Settled(outcome.clone());
                            waiters
                        }
                    }
                };
                this.slot = None;
                for waker in waiters.into_iter().flatten() {
                    waker.wake();
                }
                Poll::Ready(outcome)
            }
            Poll::Pending => {
                let mut state = this.inner.lock();
                match &mut *state {
                    TaskState::Settled(existing) => {
                        this.slot = None;
                        Poll::Ready(existing.clone())
                    }
                    TaskState::Running { future: slot, .. } => {
                        *slot = Some(future);
                        // Register for the cancel wake as well; the inner
                        // computation already holds our waker for progress.
                        Self::register(&mut this.slot, &mut state, cx.waker());
                        Poll::Pending
                    }
                }
            }
        }
    }
}

impl<T, E> Drop for RunFuture<T, E> {
    fn drop(&mut self) {
        if let Some(index) = self.slot {
            let mut state = self.inner.lock();
            if let TaskState::Running { waiters, .. } = &mut *state {
                if let Some(slot) = waiters.get_mut(index) {
                    *slot = None;
                }
            }
        }
    }
}

/// Concurrently drives a set of task runs to completion.
struct AllFuture<T, E> {
    runs: Vec<RunFuture<T, E>>,
    outcomes: Vec<Option<Outcome<T, E>>>,
}

// `AllFuture` never pins its contents; each `RunFuture` is driven through a
// fresh `Pin::new` and outcomes are moved out. Safe to treat as `Unpin`.
impl<T, E> Unpin for AllFuture<T, E> {}

impl<T, E> Future for AllFuture<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Outcome<Vec<T>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let mut all_settled = true;
        for (index, run) in this.runs.iter_mut().enumerate() {
            if this.outcomes[index].is_none() {
                match Pin::new(run).poll(cx) {
                    Poll::Ready(outcome) => this.outcomes[index] = Some(outcome),
                    Poll::Pending => all_settled = false,
                }
            }
        }
        if !all_settled {
            return Poll::Pending;
        }

        let mut values = Vec::with_capacity(this.outcomes.len());
        for outcome in this.outcomes.iter_mut() {
            match outcome.take().expect("every run settled") {
                Outcome::Ok(value) => values.push(value),
                Outcome::Err(error) => return Poll::Ready(Outcome::Err(error)),
                Outcome::Cancelled(reason) => return Poll::Ready(Outcome::Cancelled(reason)),
            }
        }
        Poll::Ready(Outcome::Ok(values))
    }
}
