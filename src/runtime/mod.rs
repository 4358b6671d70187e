//! Single-threaded cooperative executor.
//!
//! Concurrency in custody is interleaving, not parallelism: one logical
//! thread of control switches between computations at well-defined
//! suspension points (a full channel, an empty channel, an awaited lock
//! updater, a task executor's own awaits). [`CoopRuntime`] is the
//! scheduling substrate that drives those computations: a FIFO run queue
//! of spawned futures plus a [`block_on`](CoopRuntime::block_on) entry
//! point that interleaves the main future with the queue.
//!
//! No fairness is guaranteed beyond FIFO: a woken task goes to the back of
//! the run queue, and each primitive wakes its own waiters in admission
//! order.
//!
//! ```
//! use custody::channel;
//! use custody::runtime::CoopRuntime;
//!
//! let rt = CoopRuntime::new();
//! let (tx, rx) = channel::bounded::<u32>(1);
//!
//! rt.spawn(async move {
//!     for i in 0..3 {
//!         tx.send(i).await.expect("receiver alive");
//!     }
//! });
//!
//! let sum = rt.block_on(async move {
//!     let mut sum = 0;
//!     while let Some(v) = rx.recv().await {
//!         sum += v;
//!     }
//!     sum
//! });
//! assert_eq!(sum, 3);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::task::{Context, Poll, Wake, Waker};

use crate::tracing_compat::trace;

/// Run queue shared with wakers.
///
/// Wakers only enqueue task ids; futures themselves never leave the
/// runtime's thread.
#[derive(Debug)]
struct ReadyQueue {
    ready: Mutex<VecDeque<u64>>,
    available: Condvar,
}

impl ReadyQueue {
    fn new() -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<u64>> {
        self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, id: u64) {
        self.lock().push_back(id);
        self.available.notify_one();
    }

    fn pop(&self) -> Option<u64> {
        self.lock().pop_front()
    }

    /// Pops the next ready id, parking until one arrives.
    fn pop_blocking(&self) -> u64 {
        let mut guard = self.lock();
        loop {
            if let Some(id) = guard.pop_front() {
                return id;
            }
            guard = self
                .available
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Waker that re-enqueues its task id.
struct TaskWaker {
    id: u64,
    queue: Arc<ReadyQueue>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.queue.push(self.id);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.queue.push(self.id);
    }
}

type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

/// A single-threaded cooperative executor with a FIFO run queue.
///
/// Spawned futures need not be `Send`; they are polled only on the thread
/// that owns the runtime. Wakes may arrive from other threads (every
/// custody primitive is thread-safe), which unparks a parked
/// [`block_on`](Self::block_on).
pub struct CoopRuntime {
    queue: Arc<ReadyQueue>,
    tasks: RefCell<HashMap<u64, LocalFuture>>,
    next_id: Cell<u64>,
}

impl std::fmt::Debug for CoopRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoopRuntime")
            .field("pending_tasks", &self.tasks.borrow().len())
            .finish_non_exhaustive()
    }
}

impl CoopRuntime {
    /// Creates an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Arc::new(ReadyQueue::new()),
            tasks: RefCell::new(HashMap::new()),
            next_id: Cell::new(0),
        }
    }

    fn alloc_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn waker_for(&self, id: u64) -> Waker {
        Waker::from(Arc::new(TaskWaker {
            id,
            queue: Arc::clone(&self.queue),
        }))
    }

    /// Spawns a future onto the run queue.
    ///
    /// The future starts at the back of the FIFO queue and runs when the
    /// runtime is next driven by [`block_on`](Self::block_on) or
    /// [`run_until_stalled`](Self::run_until_stalled).
    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        let id = self.alloc_id();
        self.tasks.borrow_mut().insert(id, Box::pin(future));
        self.queue.push(id);
        trace!(task = id, "task spawned");
    }

    /// Polls ready tasks until none is runnable.
    ///
    /// Returns the number of polls performed. Tasks left suspended (on a
    /// full channel, say) stay parked until something wakes them.
    pub fn run_until_stalled(&self) -> usize {
        let mut polls = 0;
        while let Some(id) = self.queue.pop() {
            polls += self.poll_task(id);
        }
        polls
    }

    /// Drives `future` to completion, interleaving spawned tasks at its
    /// suspension points.
    ///
    /// Tasks already in the run queue are polled before the main future
    /// (FIFO). Parks the thread while nothing is runnable, so a genuinely
    /// stalled system blocks here until an external wake arrives.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let mut future = std::pin::pin!(future);
        let id = self.alloc_id();
        self.queue.push(id);
        let waker = self.waker_for(id);
        let mut cx = Context::from_waker(&waker);

        loop {
            let ready = self.queue.pop_blocking();
            if ready == id {
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return output;
                }
            } else {
                self.poll_task(ready);
            }
        }
    }

    /// Polls an arbitrary future exactly once against this runtime's wake
    /// machinery.
    ///
    /// Useful in tests that need to park a future mid-suspension and
    /// observe or drop it.
    pub fn poll_once<F: Future + ?Sized>(&self, future: Pin<&mut F>) -> Poll<F::Output> {
        let waker = self.waker_for(self.alloc_id());
        future.poll(&mut Context::from_waker(&waker))
    }

    /// Returns the number of spawned tasks that have not yet completed.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Polls one spawned task. Returns 1 if a poll happened.
    ///
    /// The future is taken out of the table for the duration of the poll
    /// so the task can itself spawn without re-entering the table borrow.
    fn poll_task(&self, id: u64) -> usize {
        let Some(mut future) = self.tasks.borrow_mut().remove(&id) else {
            // Stale wake for a finished task.
            return 0;
        };

        let waker = self.waker_for(id);
        let mut cx = Context::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                trace!(task = id, "task completed");
            }
            Poll::Pending => {
                self.tasks.borrow_mut().insert(id, future);
            }
        }
        1
    }
}

impl Default for CoopRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Yields once to the back of the run queue.
///
/// The first poll wakes itself and suspends; the second completes. This is
/// the smallest possible suspension point.
pub async fn yield_now() {
    struct YieldNow {
        yielded: bool,
    }

    impl Future for YieldNow {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.yielded {
                Poll::Ready(())
            } else {
                self.yielded = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    YieldNow { yielded: false }.await;
}
