// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Buffer ring ownership and cursor behaviour.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use libdspstream::proto::BusAddr;
use libdspstream::{BufferRing, Direction, Error, HeapAllocator, Layout, MapRequest};

fn sized(dir: Direction, n: usize, layout: Layout) -> BufferRing {
    let ring = BufferRing::new(dir);
    ring.allocate(&HeapAllocator::new(), 1024, n, layout, |_| Ok(())).unwrap();
    ring
}

// What a session does on submit: local access ends, the slot stays pledged.
fn send(g: libdspstream::BufferGrant) -> (usize, BusAddr) {
    (g.index(), g.bus_addr())
}

// Tiny xorshift so the sequence is reproducible without extra crates.
fn xorshift(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

#[test]
fn random_acquire_return_keeps_invariants() {
    for dir in Direction::ALL {
        for cap in [1usize, 2, 4, 16] {
            let ring = sized(dir, cap, Layout::PerBuffer);
            let mut in_flight = std::collections::VecDeque::new();
            let mut seed = 0x9E37_79B9_7F4A_7C15u64 ^ cap as u64;

            for _ in 0..2000 {
                if xorshift(&mut seed) % 2 == 0 {
                    match ring.acquire_local() {
                        Some(g) => {
                            assert_eq!(ring.is_local(g.index()), Some(false));
                            in_flight.push_back(send(g));
                        }
                        None => assert_eq!(in_flight.len(), cap, "refused while a slot was free"),
                    }
                } else if let Some((idx, addr)) = in_flight.pop_front() {
                    ring.remote_return(idx, addr, 8).unwrap();
                }
                let (local, remote) = ring.cursors().unwrap();
                assert!(local < cap && remote < cap);
                assert_eq!(ring.outstanding().len(), in_flight.len());
                assert_eq!(ring.has_remote_work(), !in_flight.is_empty());
            }
        }
    }
}

#[test]
fn fifth_acquire_waits_for_buffer_zero() {
    let ring = sized(Direction::In, 4, Layout::PerBuffer);
    let sent: Vec<_> = (0..4).map(|_| send(ring.acquire_local().unwrap())).collect();
    assert_eq!(sent.iter().map(|&(i, _)| i).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    assert!(ring.acquire_local().is_none());

    ring.remote_return(0, sent[0].1, 0).unwrap();
    let g = ring.acquire_local().unwrap();
    assert_eq!(g.index(), 0);
    assert_eq!(ring.cursors(), Some((1, 1)));
}

#[test]
fn mismatched_address_leaves_ring_untouched() {
    let ring = sized(Direction::Out, 4, Layout::PerBuffer);
    let g0 = ring.acquire_local().unwrap();
    let g1 = ring.acquire_local().unwrap();
    let before = (ring.cursors(), ring.outstanding());

    let err = ring.remote_return(0, g1.bus_addr(), 512).unwrap_err();
    assert_eq!(
        err,
        Error::ProtocolMismatch { expected: g0.bus_addr().0 as u64, received: g1.bus_addr().0 as u64 }
    );
    assert!(matches!(ring.remote_return(9, g0.bus_addr(), 0), Err(Error::ProtocolMismatch { .. })));
    assert!(matches!(ring.remote_return(0, BusAddr(0xDEAD_0000), 0), Err(Error::ProtocolMismatch { .. })));
    assert_eq!((ring.cursors(), ring.outstanding()), before);
}

#[test]
fn read_return_records_actual_size() {
    let ring = sized(Direction::Out, 2, Layout::Contiguous);
    let (idx, addr) = send(ring.acquire_local().unwrap());
    ring.remote_return(idx, addr, 300).unwrap();
    let (_, other) = send(ring.acquire_local().unwrap());
    ring.remote_return(1, other, 0).unwrap();
    let again = ring.acquire_local().unwrap();
    assert_eq!(again.index(), 0);
    assert_eq!(again.actual_size(), 300);
    assert_eq!(again.data().len(), 300);
}

#[test]
fn grant_memory_is_writable_and_persistent() {
    let ring = sized(Direction::In, 2, Layout::Contiguous);
    let mut g = ring.acquire_local().unwrap();
    g.data_mut()[..4].copy_from_slice(b"pcm!");
    let addr = g.bus_addr();
    drop(g);
    ring.remote_return(0, addr, 4).unwrap();
    let (_, skip) = send(ring.acquire_local().unwrap());
    ring.remote_return(1, skip, 0).unwrap();
    let g = ring.acquire_local().unwrap();
    assert_eq!(&g.data()[..4], b"pcm!");
}

#[test]
fn reset_returns_everything_local() {
    let ring = sized(Direction::In, 4, Layout::PerBuffer);
    send(ring.acquire_local().unwrap());
    send(ring.acquire_local().unwrap());
    ring.reset();
    assert_eq!(ring.cursors(), Some((0, 0)));
    assert!(ring.outstanding().is_empty());
    assert!(!ring.has_remote_work());
    assert_eq!(ring.acquire_local().unwrap().index(), 0);
}

#[test]
fn reset_never_hands_out_a_held_buffer_twice() {
    let ring = sized(Direction::In, 4, Layout::PerBuffer);
    let mut held = ring.acquire_local().unwrap();
    send(ring.acquire_local().unwrap());
    held.data_mut()[0] = 0x55;

    ring.reset();
    assert_eq!(ring.outstanding(), vec![0]);
    assert!(ring.has_remote_work());
    assert!(ring.acquire_local().is_none(), "slot 0 is still held");
    assert_eq!(held.data()[0], 0x55);

    assert!(ring.unacquire(held));
    assert!(!ring.has_remote_work());
    let again = ring.acquire_local().unwrap();
    assert_eq!(again.index(), 0);
}

#[test]
fn returns_out_of_order_keep_work_accounting() {
    let ring = sized(Direction::In, 4, Layout::PerBuffer);
    let (_, a0) = send(ring.acquire_local().unwrap());
    let (_, a1) = send(ring.acquire_local().unwrap());

    ring.remote_return(1, a1, 0).unwrap();
    assert_eq!(ring.cursors(), Some((2, 1)));
    assert_eq!(ring.outstanding(), vec![0]);
    assert!(ring.has_remote_work());

    ring.remote_return(0, a0, 0).unwrap();
    assert!(ring.outstanding().is_empty());
    assert!(!ring.has_remote_work());
}

#[test]
fn unacquire_of_an_older_grant_keeps_accounting() {
    let ring = sized(Direction::Out, 4, Layout::Contiguous);
    let older = ring.acquire_local().unwrap();
    let (_, a1) = send(ring.acquire_local().unwrap());

    assert!(ring.unacquire(older));
    assert_eq!(ring.outstanding(), vec![1]);
    assert!(ring.has_remote_work());
    ring.remote_return(1, a1, 0).unwrap();
    assert!(!ring.has_remote_work());
    assert!(ring.outstanding().is_empty());
}

#[test]
fn second_allocation_is_a_no_op() {
    let ring = sized(Direction::In, 4, Layout::PerBuffer);
    let maps = AtomicUsize::new(0);
    let fresh = ring
        .allocate(&HeapAllocator::new(), 64, 8, Layout::Contiguous, |_| {
            maps.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
        .unwrap();
    assert!(!fresh);
    assert_eq!(maps.load(Ordering::Relaxed), 0);
    assert_eq!(ring.capacity(), 4);
}

#[test]
fn release_unmaps_with_the_mapped_layout() {
    let ring = BufferRing::new(Direction::In);
    let mut mapped = None;
    ring.allocate(&HeapAllocator::new(), 256, 4, Layout::PerBuffer, |m| {
        mapped = Some(m.clone());
        Ok(())
    })
    .unwrap();
    let Some(MapRequest::Regions(regions)) = mapped.clone() else { panic!("per-buffer ring maps regions") };
    assert_eq!(regions.len(), 4);
    assert!(regions.iter().all(|&(_, size)| size == 256));

    let mut unmapped = None;
    assert!(ring.release_all(|m| {
        unmapped = Some(m.clone());
        Ok(())
    }));
    assert_eq!(unmapped, mapped);
    assert!(!ring.is_allocated());
    assert!(!ring.release_all(|_| Ok(())));
}

#[test]
fn release_continues_past_unmap_failure() {
    let ring = sized(Direction::Out, 2, Layout::PerBuffer);
    assert!(ring.release_all(|_| Err(Error::Timeout { opcode: 0 })));
    assert!(!ring.is_allocated());
}

#[test]
fn allocation_failure_is_resource_exhausted() {
    let ring = BufferRing::new(Direction::In);
    let err = ring.allocate(&HeapAllocator::with_limit(2048), 1024, 4, Layout::PerBuffer, |_| Ok(()));
    assert!(matches!(err, Err(Error::ResourceExhausted(_))));
    assert!(!ring.is_allocated());
}

// Producer acquires while a "remote" thread returns in FIFO order.
#[test]
fn concurrent_producer_and_remote() {
    let ring = Arc::new(sized(Direction::In, 8, Layout::Contiguous));
    let (tx, rx) = std::sync::mpsc::channel();
    let total = 5000usize;

    let r2 = Arc::clone(&ring);
    let remote = thread::spawn(move || {
        for _ in 0..total {
            let (idx, addr): (usize, BusAddr) = rx.recv().unwrap();
            r2.remote_return(idx, addr, 0).unwrap();
        }
    });

    let mut sent = 0;
    while sent < total {
        if let Some(g) = ring.acquire_local() {
            tx.send(send(g)).unwrap();
            sent += 1;
        } else {
            thread::yield_now();
        }
    }
    remote.join().unwrap();
    assert!(ring.outstanding().is_empty());
    assert!(!ring.has_remote_work());
}
