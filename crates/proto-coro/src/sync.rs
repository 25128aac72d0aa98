// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Mutex + condition variable pair used by the run and timer queues.
//!
//! Every lock, unlock, wait and notify goes through a [`SyncHooks`]
//! value. Production code uses [`NoHooks`], which compiles away; tests
//! inject `falter::Falter` to add scheduling noise and spurious wakeups.
//! Callers must re-check their predicate after every wait.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Injection points around the synchronization primitives.
pub trait SyncHooks: Clone + Send + Sync + 'static {
    /// Before the mutex is acquired. `timed` is set for reacquisition
    /// after a deadline-bounded wait.
    fn on_lock(&self, _timed: bool) {}

    /// Before the mutex is released.
    fn on_unlock(&self) {}

    /// Before a condition wait. Returning `true` replaces the wait with a
    /// spurious wakeup: unlock, yield, relock.
    fn on_wait(&self) -> bool {
        false
    }

    /// After a notification has been sent.
    fn on_notify(&self, _broadcast: bool) {}
}

/// No instrumentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl SyncHooks for NoHooks {}

/// State guarded by a mutex, plus one condition variable for it.
pub struct Monitor<T, H: SyncHooks = NoHooks> {
    state: Mutex<T>,
    cond: Condvar,
    hooks: H,
}

impl<T> Monitor<T> {
    pub fn new(state: T) -> Self {
        Self::with_hooks(state, NoHooks)
    }
}

impl<T, H: SyncHooks> Monitor<T, H> {
    pub fn with_hooks(state: T, hooks: H) -> Self {
        Self {
            state: Mutex::new(state),
            cond: Condvar::new(),
            hooks,
        }
    }

    pub fn lock(&self) -> MonitorGuard<'_, T, H> {
        self.lock_inner(false)
    }

    fn lock_inner(&self, timed: bool) -> MonitorGuard<'_, T, H> {
        self.hooks.on_lock(timed);
        // A poisoned lock means another thread already hit a contract
        // violation; the state itself is still consistent.
        let guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        MonitorGuard {
            guard: Some(guard),
            hooks: &self.hooks,
        }
    }

    /// Block until notified. May return spuriously.
    pub fn wait<'a>(&'a self, guard: MonitorGuard<'a, T, H>) -> MonitorGuard<'a, T, H> {
        if self.hooks.on_wait() {
            drop(guard);
            std::thread::yield_now();
            return self.lock_inner(false);
        }
        let inner = guard.release();
        let inner = self.cond.wait(inner).unwrap_or_else(PoisonError::into_inner);
        MonitorGuard {
            guard: Some(inner),
            hooks: &self.hooks,
        }
    }

    /// Block until notified or `deadline` passes. May return spuriously.
    pub fn wait_until<'a>(
        &'a self,
        guard: MonitorGuard<'a, T, H>,
        deadline: Instant,
    ) -> MonitorGuard<'a, T, H> {
        let now = Instant::now();
        if deadline <= now {
            return guard;
        }
        if self.hooks.on_wait() {
            drop(guard);
            std::thread::yield_now();
            return self.lock_inner(true);
        }
        let inner = guard.release();
        let (inner, _) = self
            .cond
            .wait_timeout(inner, deadline - now)
            .unwrap_or_else(PoisonError::into_inner);
        self.hooks.on_lock(true);
        MonitorGuard {
            guard: Some(inner),
            hooks: &self.hooks,
        }
    }

    pub fn notify_one(&self) {
        self.cond.notify_one();
        self.hooks.on_notify(false);
    }

    pub fn notify_all(&self) {
        self.cond.notify_all();
        self.hooks.on_notify(true);
    }
}

/// Lock guard that reports its release to the hooks.
pub struct MonitorGuard<'a, T, H: SyncHooks> {
    guard: Option<MutexGuard<'a, T>>,
    hooks: &'a H,
}

impl<'a, T, H: SyncHooks> MonitorGuard<'a, T, H> {
    /// Hand the raw guard to the condvar. The condvar unlocks it itself,
    /// so the unlock hook fires here.
    fn release(mut self) -> MutexGuard<'a, T> {
        self.hooks.on_unlock();
        match self.guard.take() {
            Some(guard) => guard,
            None => unreachable!("monitor guard released twice"),
        }
    }
}

impl<T, H: SyncHooks> Deref for MonitorGuard<'_, T, H> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.guard {
            Some(guard) => guard,
            None => unreachable!("monitor guard used after release"),
        }
    }
}

impl<T, H: SyncHooks> DerefMut for MonitorGuard<'_, T, H> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.guard {
            Some(guard) => guard,
            None => unreachable!("monitor guard used after release"),
        }
    }
}

impl<T, H: SyncHooks> Drop for MonitorGuard<'_, T, H> {
    fn drop(&mut self) {
        if self.guard.is_some() {
            self.hooks.on_unlock();
        }
    }
}
