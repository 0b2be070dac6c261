//! Mutex + condition variable guard
//!
//! One lock, one condition. The reader pool shares a single guard between its
//! worker thread and every reader registered with it:
//! - blocking [`Guard::lock`] for the worker and for (de)registration
//! - non-blocking [`Guard::try_lock`] for the real-time render path
//!
//! Ownership is carried by the returned [`GuardLock`]: whoever holds it must
//! release it, and it is released exactly once, when it drops.

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Held lock on a [`Guard`]
pub type GuardLock<'a, T> = MutexGuard<'a, T>;

/// Protected state plus the condition used to hand work between threads
#[derive(Debug, Default)]
pub struct Guard<T> {
    state: Mutex<T>,
    cond: Condvar,
}

impl<T> Guard<T> {
    /// Create a guard around `state`
    pub fn new(state: T) -> Self {
        Guard {
            state: Mutex::new(state),
            cond: Condvar::new(),
        }
    }

    /// Block until the lock is acquired
    pub fn lock(&self) -> GuardLock<'_, T> {
        self.state.lock()
    }

    /// Acquire the lock only if nobody else holds it
    pub fn try_lock(&self) -> Option<GuardLock<'_, T>> {
        self.state.try_lock()
    }

    /// Release the lock, sleep until notified, then re-acquire it
    ///
    /// Wake-ups may be spurious; callers re-check their condition.
    pub fn wait(&self, lock: &mut GuardLock<'_, T>) {
        self.cond.wait(lock);
    }

    /// Wake every waiter
    pub fn notify(&self) {
        self.cond.notify_all();
    }
}
