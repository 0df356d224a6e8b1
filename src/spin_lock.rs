// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Spin lock with adaptive backoff: pause → yield → sleep.
// Guards the ring state touched from the delivery path, which must never
// park on a sleeping mutex.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};

/// Adaptive backoff.
///
/// - k < 4:  busy spin (do nothing)
/// - k < 16: CPU pause hint
/// - k < 32: thread yield
/// - k >= 32: sleep 1ms
#[inline]
fn adaptive_yield(k: &mut u32) {
    if *k < 4 {
        // busy spin
    } else if *k < 16 {
        std::hint::spin_loop();
    } else if *k < 32 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(std::time::Duration::from_millis(1));
        return;
    }
    *k += 1;
}

/// A spin lock owning the data it protects.
///
/// Uses an `AtomicU32` exchanged to 1 on lock and stored to 0 on unlock,
/// with adaptive yield between retries. Critical sections must stay short:
/// a flag flip and a cursor bump.
pub struct SpinLock<T> {
    lc: AtomicU32,
    value: UnsafeCell<T>,
}

// Safety: access to `value` is serialised by `lc`.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            lc: AtomicU32::new(0),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock (spinning with adaptive backoff).
    pub fn lock(&self) -> SpinGuard<'_, T> {
        let mut k = 0u32;
        while self.lc.swap(1, Ordering::Acquire) != 0 {
            adaptive_yield(&mut k);
        }
        SpinGuard { lock: self }
    }

    /// Single attempt; `None` if contended.
    pub fn try_lock(&self) -> Option<SpinGuard<'_, T>> {
        match self.lc.swap(1, Ordering::Acquire) {
            0 => Some(SpinGuard { lock: self }),
            _ => None,
        }
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII guard: releases the spin lock on drop.
pub struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.lc.store(0, Ordering::Release);
    }
}
