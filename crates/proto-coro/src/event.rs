// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Thread-blocking one-shot latch.
//!
//! Used to hand a result from a coroutine back to a plain thread, e.g. a
//! test or `main` waiting for a spawned routine to finish.

use std::time::{Duration, Instant};

use crate::sync::{Monitor, NoHooks, SyncHooks};

pub struct OneshotEvent<H: SyncHooks = NoHooks> {
    fired: Monitor<bool, H>,
}

impl OneshotEvent {
    pub fn new() -> Self {
        Self::with_hooks(NoHooks)
    }
}

impl Default for OneshotEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: SyncHooks> OneshotEvent<H> {
    pub fn with_hooks(hooks: H) -> Self {
        Self {
            fired: Monitor::with_hooks(false, hooks),
        }
    }

    /// Release every current and future waiter. Firing again is a no-op.
    pub fn fire(&self) {
        *self.fired.lock() = true;
        self.fired.notify_all();
    }

    pub fn is_fired(&self) -> bool {
        *self.fired.lock()
    }

    pub fn wait(&self) {
        let mut fired = self.fired.lock();
        while !*fired {
            fired = self.fired.wait(fired);
        }
    }

    /// Returns whether the event fired before `timeout` elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut fired = self.fired.lock();
        while !*fired {
            if Instant::now() >= deadline {
                return false;
            }
            fired = self.fired.wait_until(fired, deadline);
        }
        true
    }
}
