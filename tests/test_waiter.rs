// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Waiter: bounded predicate wait used by command channels.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use libdspstream::Waiter;

#[test]
fn waiter_broadcast() {
    let waiter = Arc::new(Waiter::new());
    let k = Arc::new(AtomicI32::new(0));

    let mut threads = Vec::new();
    for _ in 0..4 {
        let w = Arc::clone(&waiter);
        let k2 = Arc::clone(&k);
        threads.push(thread::spawn(move || {
            // wait through 3 increments
            for i in 0..3 {
                assert!(w.wait_if(|| k2.load(Ordering::Acquire) == i, None));
            }
        }));
    }

    for val in 1..=3 {
        thread::sleep(Duration::from_millis(50));
        k.store(val, Ordering::Release);
        waiter.broadcast();
    }

    for t in threads {
        t.join().unwrap();
    }
}

#[test]
fn waiter_quit_waiting() {
    let waiter = Arc::new(Waiter::new());

    let w2 = Arc::clone(&waiter);
    let t = thread::spawn(move || {
        // quit counts as a wake-up, not a timeout
        assert!(w2.wait_if(|| true, None));
    });

    thread::sleep(Duration::from_millis(100));
    waiter.quit_waiting();
    assert!(waiter.is_quit());
    t.join().unwrap();
}

#[test]
fn waiter_notify_one() {
    let waiter = Arc::new(Waiter::new());
    let flag = Arc::new(AtomicBool::new(false));
    let woken = Arc::new(AtomicI32::new(0));

    let mut threads = Vec::new();
    for _ in 0..3 {
        let w = Arc::clone(&waiter);
        let f = Arc::clone(&flag);
        let n = Arc::clone(&woken);
        threads.push(thread::spawn(move || {
            w.wait_if(|| !f.load(Ordering::Acquire), Some(Duration::from_secs(2)));
            n.fetch_add(1, Ordering::Relaxed);
        }));
    }

    thread::sleep(Duration::from_millis(100));
    flag.store(true, Ordering::Release);
    waiter.notify();
    thread::sleep(Duration::from_millis(50));
    waiter.broadcast();

    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(woken.load(Ordering::Relaxed), 3);
}

#[test]
fn waiter_wait_timeout() {
    let waiter = Waiter::new();
    let start = Instant::now();
    let result = waiter.wait_if(|| true, Some(Duration::from_millis(100)));
    let elapsed = start.elapsed();

    assert!(!result, "should return false on timeout");
    assert!(elapsed >= Duration::from_millis(80), "should wait ~100ms");
    assert!(elapsed < Duration::from_millis(500), "should not wait too long");
}

#[test]
fn waiter_wait_predicate_false() {
    let waiter = Waiter::new();
    assert!(waiter.wait_if(|| false, None), "predicate already false");
}

// A notifier that flips the predicate right at the deadline still counts.
#[test]
fn waiter_late_flip_is_success() {
    let waiter = Waiter::new();
    let flag = AtomicBool::new(true);
    let r = waiter.wait_if(
        || {
            let pending = flag.load(Ordering::Acquire);
            flag.store(false, Ordering::Release);
            pending
        },
        Some(Duration::from_millis(10)),
    );
    assert!(r);
}
