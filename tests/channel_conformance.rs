//! Conformance tests for the bounded channel.
//!
//! Covers the ordering and lifecycle guarantees: FIFO delivery, FIFO wake
//! order under backpressure, close-drains semantics, and failure of sends
//! against a closed channel.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use custody::channel::{bounded, unbounded, SendError, TryRecvError};
use custody::runtime::CoopRuntime;

#[test]
fn fifo_delivery_on_unbounded_channel() {
    common::init_test_logging();
    let rt = CoopRuntime::new();
    let (tx, rx) = unbounded::<i32>();

    rt.block_on(async move {
        for v in [1, 2, 3] {
            tx.send(v).await.expect("send failed");
        }
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
    });
}

#[test]
fn capacity_one_send_completes_only_after_drain() {
    common::init_test_logging();
    let rt = CoopRuntime::new();
    let (tx, rx) = bounded::<i32>(1);
    let second_sent = Arc::new(AtomicBool::new(false));

    rt.block_on(tx.send(1)).expect("first send");

    let sender = tx.clone();
    let flag = Arc::clone(&second_sent);
    rt.spawn(async move {
        sender.send(2).await.expect("second send");
        flag.store(true, Ordering::SeqCst);
    });

    rt.run_until_stalled();
    assert!(
        !second_sent.load(Ordering::SeqCst),
        "second send must suspend while the buffer holds a value"
    );

    assert_eq!(rt.block_on(rx.recv()), Some(1));
    rt.run_until_stalled();
    assert!(second_sent.load(Ordering::SeqCst));
    assert_eq!(rt.block_on(rx.recv()), Some(2));
}

#[test]
fn close_drains_buffered_value_then_reports_absent() {
    common::init_test_logging();
    let rt = CoopRuntime::new();
    let (tx, rx) = bounded::<i32>(2);

    rt.block_on(tx.send(42)).expect("send failed");
    tx.close();

    assert_eq!(rt.block_on(rx.recv()), Some(42));
    assert_eq!(rt.block_on(rx.recv()), None);
    assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
}

#[test]
fn send_after_close_fails_and_returns_value() {
    common::init_test_logging();
    let rt = CoopRuntime::new();
    let (tx, rx) = bounded::<String>(2);

    rx.close();
    let err = rt
        .block_on(tx.send(String::from("lost")))
        .expect_err("send on closed channel must fail");
    assert_eq!(err, SendError(String::from("lost")));
    assert_eq!(err.into_inner(), "lost");
}

#[test]
fn suspended_senders_resume_in_admission_order() {
    common::init_test_logging();
    let rt = CoopRuntime::new();
    let (tx, rx) = bounded::<u32>(1);
    let completions = Arc::new(Mutex::new(Vec::new()));

    rt.block_on(tx.send(0)).expect("fill send");

    for value in [1_u32, 2, 3] {
        let tx = tx.clone();
        let completions = Arc::clone(&completions);
        rt.spawn(async move {
            tx.send(value).await.expect("queued send");
            completions.lock().expect("completions lock").push(value);
        });
    }
    rt.run_until_stalled();
    assert_eq!(tx.pending_senders(), 3);

    let mut received = Vec::new();
    for _ in 0..4 {
        received.push(rt.block_on(rx.recv()).expect("receive failed"));
        rt.run_until_stalled();
    }

    assert_eq!(received, vec![0, 1, 2, 3], "values arrive in send order");
    assert_eq!(
        completions.lock().expect("completions lock").as_slice(),
        &[1, 2, 3],
        "senders resume in admission order"
    );
}

#[test]
fn close_fails_every_suspended_send_and_preserves_the_buffer() {
    common::init_test_logging();
    let rt = CoopRuntime::new();
    let (tx, rx) = bounded::<i32>(1);

    rt.block_on(tx.send(1)).expect("fill send");

    let failed_sends = Arc::new(Mutex::new(0));
    for _ in 0..2 {
        let tx = tx.clone();
        let failed = Arc::clone(&failed_sends);
        rt.spawn(async move {
            if tx.send(99).await.is_err() {
                *failed.lock().expect("failed lock") += 1;
            }
        });
    }
    rt.run_until_stalled();
    assert_eq!(tx.pending_senders(), 2);

    tx.close();
    rt.run_until_stalled();

    assert_eq!(*failed_sends.lock().expect("failed lock"), 2);
    assert_eq!(rt.block_on(rx.recv()), Some(1), "buffered value survives close");
    assert_eq!(rt.block_on(rx.recv()), None);
}

#[test]
fn close_wakes_suspended_receivers_with_absent() {
    common::init_test_logging();
    let rt = CoopRuntime::new();
    let (tx, rx) = bounded::<i32>(1);

    let observed = Arc::new(Mutex::new(None));
    {
        let rx = rx.clone();
        let observed = Arc::clone(&observed);
        rt.spawn(async move {
            *observed.lock().expect("observed lock") = Some(rx.recv().await);
        });
    }
    rt.run_until_stalled();
    assert_eq!(rx.pending_receivers(), 1);

    tx.close();
    rt.run_until_stalled();
    assert_eq!(*observed.lock().expect("observed lock"), Some(None));
}

#[test]
fn values_from_multiple_senders_arrive_in_send_order() {
    common::init_test_logging();
    let rt = CoopRuntime::new();
    let (tx1, rx) = unbounded::<i32>();
    let tx2 = tx1.clone();

    rt.block_on(async move {
        tx1.send(1).await.expect("send 1");
        tx2.send(2).await.expect("send 2");
        tx1.send(3).await.expect("send 3");

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
    });
}
