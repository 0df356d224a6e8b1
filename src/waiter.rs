// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Condition-variable + mutex wrapper used by the command channel and the
// memory map service to park the issuing thread until an acknowledgement
// arrives or the bound elapses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A waiter combining a condition variable, a mutex, and a quit flag.
///
/// The predicate state lives outside the waiter (atomics owned by the
/// caller). Notifiers update that state first, then call [`notify`] or
/// [`broadcast`]; the brief lock taken there closes the window between a
/// waiter's predicate check and its park.
///
/// [`notify`]: Waiter::notify
/// [`broadcast`]: Waiter::broadcast
pub struct Waiter {
    cond: Condvar,
    lock: Mutex<()>,
    quit: AtomicBool,
}

impl Waiter {
    pub fn new() -> Self {
        Self {
            cond: Condvar::new(),
            lock: Mutex::new(()),
            quit: AtomicBool::new(false),
        }
    }

    /// Block while `pred` returns `true`, until quit is signalled or the
    /// timeout elapses. Returns `false` on timeout, `true` otherwise.
    pub fn wait_if<F>(&self, pred: F, timeout: Option<Duration>) -> bool
    where
        F: Fn() -> bool,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.lock.lock();
        while !self.quit.load(Ordering::Relaxed) && pred() {
            match deadline {
                None => self.cond.wait(&mut guard),
                Some(dl) => {
                    if self.cond.wait_until(&mut guard, dl).timed_out() {
                        // one last look: the notifier may have raced the deadline
                        return !pred();
                    }
                }
            }
        }
        true
    }

    /// Wake one waiter.
    pub fn notify(&self) {
        // Barrier: briefly acquire lock to ensure waiter is parked or has
        // not yet checked the predicate.
        drop(self.lock.lock());
        self.cond.notify_one();
    }

    /// Wake all waiters.
    pub fn broadcast(&self) {
        drop(self.lock.lock());
        self.cond.notify_all();
    }

    /// Signal quit and broadcast to wake all waiters.
    pub fn quit_waiting(&self) {
        self.quit.store(true, Ordering::Release);
        self.broadcast();
    }

    pub fn is_quit(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}
