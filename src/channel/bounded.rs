//! Channel implementation: shared queue, wait-lists, and futures.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use super::{SendError, TryRecvError, TrySendError};
use crate::tracing_compat::{debug, trace};

/// One suspended operation in a wait-list.
///
/// The waker is `None` after the waiter has been woken but before it has
/// been re-polled; the entry stays queued so it keeps its place in line.
#[derive(Debug)]
struct Waiter {
    id: u64,
    waker: Option<Waker>,
}

#[derive(Debug)]
struct ChannelInner<T> {
    queue: VecDeque<T>,
    /// `None` means unbounded: senders never suspend.
    capacity: Option<usize>,
    closed: bool,
    pending_senders: VecDeque<Waiter>,
    pending_receivers: VecDeque<Waiter>,
    next_waiter_id: u64,
    sender_count: usize,
    receiver_count: usize,
}

impl<T> ChannelInner<T> {
    fn new(capacity: Option<usize>) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
            closed: false,
            pending_senders: VecDeque::new(),
            pending_receivers: VecDeque::new(),
            next_waiter_id: 0,
            sender_count: 1,
            receiver_count: 1,
        }
    }

    fn has_space(&self) -> bool {
        self.capacity.map_or(true, |cap| self.queue.len() < cap)
    }

    fn alloc_waiter_id(&mut self) -> u64 {
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        id
    }

    /// Hands the wake to the oldest suspended sender, if one is sleeping.
    fn wake_next_sender(&mut self) {
        if let Some(waiter) = self.pending_senders.front_mut() {
            if let Some(waker) = waiter.waker.take() {
                waker.wake();
            }
        }
    }

    /// Hands the wake to the oldest suspended receiver, if one is sleeping.
    fn wake_next_receiver(&mut self) {
        if let Some(waiter) = self.pending_receivers.front_mut() {
            if let Some(waker) = waiter.waker.take() {
                waker.wake();
            }
        }
    }

    /// Marks the channel closed and takes every waiter's waker.
    ///
    /// Returns the wakers so the caller can fire them after releasing the
    /// state lock. Idempotent.
    fn close(&mut self) -> Vec<Waker> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        self.pending_senders
            .drain(..)
            .chain(self.pending_receivers.drain(..))
            .filter_map(|waiter| waiter.waker)
            .collect()
    }
}

#[derive(Debug)]
struct ChannelShared<T> {
    inner: Mutex<ChannelInner<T>>,
}

impl<T> ChannelShared<T> {
    fn lock(&self) -> MutexGuard<'_, ChannelInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        let wakers = self.lock().close();
        if !wakers.is_empty() {
            debug!(waiters = wakers.len(), "channel closed; waking waiters");
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

/// Creates a bounded channel with the given capacity.
///
/// Senders suspend once `capacity` values are buffered and resume in FIFO
/// admission order as receivers drain.
///
/// # Panics
///
/// Panics if `capacity` is 0.
#[must_use]
pub fn bounded<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    assert!(capacity > 0, "channel capacity must be non-zero");
    new_channel(Some(capacity))
}

/// Creates an unbounded channel. Senders never suspend.
#[must_use]
pub fn unbounded<T>() -> (Sender<T>, Receiver<T>) {
    new_channel(None)
}

fn new_channel<T>(capacity: Option<usize>) -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(ChannelShared {
        inner: Mutex::new(ChannelInner::new(capacity)),
    });
    let sender = Sender {
        shared: Arc::clone(&shared),
    };
    let receiver = Receiver { shared };
    (sender, receiver)
}

/// The sending half of a channel.
///
/// Cloning yields another sender over the same channel. When the last
/// sender drops, the channel closes (buffered values remain receivable).
#[derive(Debug)]
pub struct Sender<T> {
    shared: Arc<ChannelShared<T>>,
}

impl<T> Sender<T> {
    /// Sends a value, suspending while the buffer is full.
    ///
    /// Resolves to `Err` if the channel is closed before the value is
    /// admitted, including a close that lands while this send is
    /// suspended. The unsent value is handed back in the error.
    #[must_use = "futures do nothing unless awaited"]
    pub fn send(&self, value: T) -> SendFuture<'_, T> {
        SendFuture {
            sender: self,
            value: Some(value),
            waiter: None,
        }
    }

    /// Attempts to send without suspending.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut inner = self.shared.lock();
        if inner.closed {
            return Err(TrySendError::Closed(value));
        }
        if !inner.has_space() || !inner.pending_senders.is_empty() {
            return Err(TrySendError::Full(value));
        }
        inner.queue.push_back(value);
        inner.wake_next_receiver();
        Ok(())
    }

    /// Closes the channel: pending operations are woken, later sends fail,
    /// buffered values remain receivable. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Returns true once the channel is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Returns the buffer capacity, or `None` if unbounded.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.shared.lock().capacity
    }

    /// Returns the number of buffered values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Returns true if no values are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.lock().queue.is_empty()
    }

    /// Returns the number of sends currently suspended on backpressure.
    #[must_use]
    pub fn pending_senders(&self) -> usize {
        self.shared.lock().pending_senders.len()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.lock().sender_count += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let last = {
            let mut inner = self.shared.lock();
            inner.sender_count -= 1;
            inner.sender_count == 0
        };
        if last {
            trace!("last sender dropped; closing channel");
            self.shared.close();
        }
    }
}

/// The receiving half of a channel.
///
/// Cloning yields another receiver over the same channel; each buffered
/// value is delivered to exactly one receiver. When the last receiver
/// drops, the channel closes and suspended sends fail.
#[derive(Debug)]
pub struct Receiver<T> {
    shared: Arc<ChannelShared<T>>,
}

impl<T> Receiver<T> {
    /// Receives the oldest buffered value, suspending while the buffer is
    /// empty.
    ///
    /// Resolves to `None` once the channel is closed and drained.
    #[must_use = "futures do nothing unless awaited"]
    pub fn recv(&self) -> RecvFuture<'_, T> {
        RecvFuture {
            receiver: self,
            waiter: None,
        }
    }

    /// Attempts to receive without suspending.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut inner = self.shared.lock();
        if let Some(value) = inner.queue.pop_front() {
            inner.wake_next_sender();
            return Ok(value);
        }
        if inner.closed {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    /// Closes the channel: pending operations are woken, later sends fail,
    /// buffered values remain receivable. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Returns true once the channel is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Returns the number of buffered values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Returns true if no values are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.lock().queue.is_empty()
    }

    /// Returns the number of receives currently suspended on an empty
    /// buffer.
    #[must_use]
    pub fn pending_receivers(&self) -> usize {
        self.shared.lock().pending_receivers.len()
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.shared.lock().receiver_count += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let last = {
            let mut inner = self.shared.lock();
            inner.receiver_count -= 1;
            inner.receiver_count == 0
        };
        if last {
            trace!("last receiver dropped; closing channel");
            self.shared.close();
        }
    }
}

/// Future returned by [`Sender::send`].
///
/// Cancel-safe: dropping a suspended send removes its wait-list entry and,
/// if the entry had already been woken, passes the wake to the next sender
/// in line.
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct SendFuture<'a, T> {
    sender: &'a Sender<T>,
    value: Option<T>,
    waiter: Option<u64>,
}

// `SendFuture` never pins its `value`; it is moved out on completion. The
// future is therefore safe to treat as `Unpin` regardless of `T`.
impl<T> Unpin for SendFuture<'_, T> {}

impl<T> Future for SendFuture<'_, T> {
    type Output = Result<(), SendError<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut inner = this.sender.shared.lock();

        if inner.closed {
            // Close cleared the wait-lists already.
            this.waiter = None;
            let value = this.value.take().expect("send future polled after completion");
            return Poll::Ready(Err(SendError(value)));
        }

        let at_front = match this.waiter {
            Some(id) => inner.pending_senders.front().map(|w| w.id) == Some(id),
            None => inner.pending_senders.is_empty(),
        };

        if at_front && inner.has_space() {
            if this.waiter.take().is_some() {
                inner.pending_senders.pop_front();
            }
            let value = this.value.take().expect("send future polled after completion");
            inner.queue.push_back(value);
            inner.wake_next_receiver();
            if inner.has_space() {
                inner.wake_next_sender();
            }
            return Poll::Ready(Ok(()));
        }

        // Suspend: enter the wait-list in admission order, or refresh the
        // stored waker while queued.
        match this.waiter {
            None => {
                let id = inner.alloc_waiter_id();
                inner.pending_senders.push_back(Waiter {
                    id,
                    waker: Some(cx.waker().clone()),
                });
                this.waiter = Some(id);
            }
            Some(id) => {
                if let Some(waiter) = inner.pending_senders.iter_mut().find(|w| w.id == id) {
                    waiter.waker = Some(cx.waker().clone());
                }
            }
        }
        Poll::Pending
    }
}

impl<T> Drop for SendFuture<'_, T> {
    fn drop(&mut self) {
        let Some(id) = self.waiter else { return };
        let mut inner = self.sender.shared.lock();
        if let Some(pos) = inner.pending_senders.iter().position(|w| w.id == id) {
            let removed = inner
                .pending_senders
                .remove(pos)
                .expect("waiter position is valid");
            // A consumed waker means the wake arrived but was never acted
            // on; hand it to the next sender in line.
            if removed.waker.is_none() && inner.has_space() {
                inner.wake_next_sender();
            }
        }
    }
}

/// Future returned by [`Receiver::recv`].
///
/// Cancel-safe: dropping a suspended receive removes its wait-list entry
/// and, if the entry had already been woken, passes the wake to the next
/// receiver in line.
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct RecvFuture<'a, T> {
    receiver: &'a Receiver<T>,
    waiter: Option<u64>,
}

impl<T> Future for RecvFuture<'_, T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut inner = this.receiver.shared.lock();

        if inner.closed {
            // Draining a closed channel never suspends.
            this.waiter = None;
            return Poll::Ready(inner.queue.pop_front());
        }

        let at_front = match this.waiter {
            Some(id) => inner.pending_receivers.front().map(|w| w.id) == Some(id),
            None => inner.pending_receivers.is_empty(),
        };

        if at_front && !inner.queue.is_empty() {
            if this.waiter.take().is_some() {
                inner.pending_receivers.pop_front();
            }
            let value = inner.queue.pop_front().expect("queue is non-empty");
            inner.wake_next_sender();
            if !inner.queue.is_empty() {
                inner.wake_next_receiver();
            }
            return Poll::Ready(Some(value));
        }

        match this.waiter {
            None => {
                let id = inner.alloc_waiter_id();
                inner.pending_receivers.push_back(Waiter {
                    id,
                    waker: Some(cx.waker().clone()),
                });
                this.waiter = Some(id);
            }
            Some(id) => {
                if let Some(waiter) = inner.pending_receivers.iter_mut().find(|w| w.id == id) {
                    waiter.waker = Some(cx.waker().clone());
                }
            }
        }
        Poll::Pending
    }
}

impl<T> Drop for RecvFuture<'_, T> {
    fn drop(&mut self) {
        let Some(id) = self.waiter else { return };
        let mut inner = self.receiver.shared.lock();
        if let Some(pos) = inner.pending_receivers.iter().position(|w| w.id == id) {
            let removed = inner
                .pending_receivers
                .remove(pos)
                .expect("waiter position is valid");
            if removed.waker.is_none() && !inner.queue.is_empty() {
                inner.wake_next_receiver();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::CoopRuntime;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    #[should_panic(expected = "channel capacity must be non-zero")]
    fn bounded_capacity_must_be_nonzero() {
        let _ = bounded::<i32>(0);
    }

    #[test]
    fn fifo_delivery() {
        let rt = CoopRuntime::new();
        let (tx, rx) = unbounded::<i32>();

        rt.block_on(async move {
            tx.send(1).await.expect("send 1");
            tx.send(2).await.expect("send 2");
            tx.send(3).await.expect("send 3");

            assert_eq!(rx.recv().await, Some(1));
            assert_eq!(rx.recv().await, Some(2));
            assert_eq!(rx.recv().await, Some(3));
        });
    }

    #[test]
    fn unbounded_never_suspends_senders() {
        let rt = CoopRuntime::new();
        let (tx, rx) = unbounded::<usize>();

        rt.block_on(async move {
            for i in 0..1000 {
                tx.send(i).await.expect("send failed");
            }
            assert_eq!(rx.len(), 1000);
        });
    }

    #[test]
    fn backpressure_suspends_until_drained() {
        let rt = CoopRuntime::new();
        let (tx, rx) = bounded::<i32>(1);
        let second_done = Arc::new(AtomicBool::new(false));

        rt.block_on(tx.send(1)).expect("first send");

        let tx2 = tx.clone();
        let done = Arc::clone(&second_done);
        rt.spawn(async move {
            tx2.send(2).await.expect("second send");
            done.store(true, Ordering::SeqCst);
        });

        rt.run_until_stalled();
        assert!(
            !second_done.load(Ordering::SeqCst),
            "second send must stay suspended while the buffer is full"
        );

        assert_eq!(rt.block_on(rx.recv()), Some(1));
        rt.run_until_stalled();
        assert!(second_done.load(Ordering::SeqCst));
        assert_eq!(rt.block_on(rx.recv()), Some(2));
    }

    #[test]
    fn close_drains_then_reports_absent() {
        let rt = CoopRuntime::new();
        let (tx, rx) = bounded::<i32>(4);

        rt.block_on(tx.send(7)).expect("send failed");
        tx.close();

        assert_eq!(rt.block_on(rx.recv()), Some(7));
        assert_eq!(rt.block_on(rx.recv()), None);
        assert_eq!(rt.block_on(rx.recv()), None);
    }

    #[test]
    fn send_on_closed_channel_fails_with_value() {
        let rt = CoopRuntime::new();
        let (tx, rx) = bounded::<i32>(4);

        rx.close();
        let err = rt.block_on(tx.send(9)).expect_err("send must fail");
        assert_eq!(err, SendError(9));
    }

    #[test]
    fn close_while_suspended_fails_the_send() {
        let rt = CoopRuntime::new();
        let (tx, rx) = bounded::<i32>(1);
        let failed = Arc::new(AtomicBool::new(false));

        rt.block_on(tx.send(1)).expect("first send");

        let tx2 = tx.clone();
        let saw_failure = Arc::clone(&failed);
        rt.spawn(async move {
            let err = tx2.send(2).await.expect_err("send must fail after close");
            assert_eq!(err.into_inner(), 2);
            saw_failure.store(true, Ordering::SeqCst);
        });

        rt.run_until_stalled();
        rx.close();
        rt.run_until_stalled();
        assert!(failed.load(Ordering::SeqCst));
    }

    #[test]
    fn blocked_senders_resume_in_admission_order() {
        let rt = CoopRuntime::new();
        let (tx, rx) = bounded::<&str>(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        rt.block_on(tx.send("fill")).expect("fill send");

        for name in ["first", "second", "third"] {
            let tx = tx.clone();
            let order = Arc::clone(&order);
            rt.spawn(async move {
                tx.send(name).await.expect("queued send");
                order.lock().expect("order lock").push(name);
            });
        }
        rt.run_until_stalled();

        // Drain one value at a time; each drain admits exactly one sender.
        for expected in ["fill", "first", "second", "third"] {
            assert_eq!(rt.block_on(rx.recv()), Some(expected));
            rt.run_until_stalled();
        }
        assert_eq!(
            order.lock().expect("order lock").as_slice(),
            &["first", "second", "third"]
        );
    }

    #[test]
    fn receivers_wake_in_admission_order() {
        let rt = CoopRuntime::new();
        let (tx, rx) = bounded::<usize>(4);
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in [10usize, 20] {
            let rx = rx.clone();
            let order = Arc::clone(&order);
            rt.spawn(async move {
                let value = rx.recv().await.expect("receive failed");
                order.lock().expect("order lock").push((tag, value));
            });
        }
        rt.run_until_stalled();

        rt.block_on(tx.send(1)).expect("send 1");
        rt.run_until_stalled();
        rt.block_on(tx.send(2)).expect("send 2");
        rt.run_until_stalled();

        assert_eq!(
            order.lock().expect("order lock").as_slice(),
            &[(10, 1), (20, 2)]
        );
    }

    #[test]
    fn dropped_send_future_releases_its_slot() {
        let rt = CoopRuntime::new();
        let (tx, rx) = bounded::<i32>(1);

        rt.block_on(tx.send(1)).expect("first send");

        // Park a send future deep enough to register, then drop it.
        {
            let mut future = Box::pin(tx.send(2));
            assert!(rt.poll_once(future.as_mut()).is_pending());
            assert_eq!(tx.pending_senders(), 1);
        }
        assert_eq!(tx.pending_senders(), 0);

        // The queue keeps flowing for later senders.
        assert_eq!(rt.block_on(rx.recv()), Some(1));
        rt.block_on(tx.send(3)).expect("later send");
        assert_eq!(rt.block_on(rx.recv()), Some(3));
    }

    #[test]
    fn try_send_try_recv() {
        let (tx, rx) = bounded::<i32>(1);

        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        tx.try_send(5).expect("try_send failed");
        assert_eq!(tx.try_send(6), Err(TrySendError::Full(6)));
        assert_eq!(rx.try_recv(), Ok(5));

        tx.close();
        assert_eq!(tx.try_send(7), Err(TrySendError::Closed(7)));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn close_is_idempotent() {
        let (tx, rx) = bounded::<i32>(1);
        tx.close();
        tx.close();
        rx.close();
        assert!(tx.is_closed());
        assert!(rx.is_closed());
    }

    #[test]
    fn last_sender_drop_closes_channel() {
        let rt = CoopRuntime::new();
        let (tx, rx) = bounded::<i32>(4);

        rt.block_on(tx.send(1)).expect("send failed");
        let tx2 = tx.clone();
        drop(tx);
        assert!(!rx.is_closed());
        drop(tx2);
        assert!(rx.is_closed());

        // Buffered value still drains.
        assert_eq!(rt.block_on(rx.recv()), Some(1));
        assert_eq!(rt.block_on(rx.recv()), None);
    }

    #[test]
    fn last_receiver_drop_fails_senders() {
        let rt = CoopRuntime::new();
        let (tx, rx) = bounded::<i32>(4);

        drop(rx);
        assert!(tx.is_closed());
        let err = rt.block_on(tx.send(1)).expect_err("send must fail");
        assert_eq!(err.into_inner(), 1);
    }

    #[test]
    fn multiple_senders_share_the_queue() {
        let rt = CoopRuntime::new();
        let (tx1, rx) = unbounded::<i32>();
        let tx2 = tx1.clone();
        let received = Arc::new(AtomicUsize::new(0));

        rt.block_on(async move {
            tx1.send(1).await.expect("send 1");
            tx2.send(2).await.expect("send 2");
        });

        let total = Arc::clone(&received);
        rt.block_on(async move {
            while let Ok(_value) = rx.try_recv() {
                total.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(received.load(Ordering::SeqCst), 2);
    }
}
