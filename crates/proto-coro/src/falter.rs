// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Fault-injecting sync hooks for stress tests.
//!
//! `Falter` randomly yields the current thread around lock acquisition,
//! lock release and notification, and turns some condition waits into
//! spurious wakeups. Queue code must stay correct under all of it.
//! Counters are relaxed atomics; read them as an approximate snapshot.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::Rng;

use crate::sync::SyncHooks;

/// One in `MUTEX_FAULT_ODDS` lock operations yields first.
const MUTEX_FAULT_ODDS: u32 = 5;
/// One in `SPURIOUS_WAKEUP_ODDS` waits returns without a notification.
const SPURIOUS_WAKEUP_ODDS: u32 = 4;

#[derive(Debug, Default)]
struct Counters {
    locks: AtomicU64,
    timed_locks: AtomicU64,
    cond_waits: AtomicU64,
    cond_signals: AtomicU64,
    cond_broadcasts: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub locks: u64,
    pub timed_locks: u64,
    pub cond_waits: u64,
    pub cond_signals: u64,
    pub cond_broadcasts: u64,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats{{locks: {}, timed_locks: {}, cond_waits: {}, cond_signals: {}, cond_broadcasts: {}}}",
            self.locks, self.timed_locks, self.cond_waits, self.cond_signals, self.cond_broadcasts
        )
    }
}

/// Shared handle; clones count into the same counters.
#[derive(Debug, Clone, Default)]
pub struct Falter {
    counters: Arc<Counters>,
}

impl Falter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_imprecise(&self) -> Stats {
        let c = &self.counters;
        Stats {
            locks: c.locks.load(Ordering::Relaxed),
            timed_locks: c.timed_locks.load(Ordering::Relaxed),
            cond_waits: c.cond_waits.load(Ordering::Relaxed),
            cond_signals: c.cond_signals.load(Ordering::Relaxed),
            cond_broadcasts: c.cond_broadcasts.load(Ordering::Relaxed),
        }
    }

    fn mutex_fault(&self) {
        if rand::thread_rng().gen_ratio(1, MUTEX_FAULT_ODDS) {
            std::thread::yield_now();
        }
    }
}

impl SyncHooks for Falter {
    fn on_lock(&self, timed: bool) {
        self.mutex_fault();
        let counter = if timed {
            &self.counters.timed_locks
        } else {
            &self.counters.locks
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn on_unlock(&self) {
        self.mutex_fault();
    }

    fn on_wait(&self) -> bool {
        self.counters.cond_waits.fetch_add(1, Ordering::Relaxed);
        rand::thread_rng().gen_ratio(1, SPURIOUS_WAKEUP_ODDS)
    }

    fn on_notify(&self, broadcast: bool) {
        let counter = if broadcast {
            &self.counters.cond_broadcasts
        } else {
            &self.counters.cond_signals
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.mutex_fault();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Monitor;

    #[test]
    fn counters_are_shared_between_clones() {
        let falter = Falter::new();
        let m = Monitor::with_hooks(0u32, falter.clone());
        for _ in 0..10 {
            *m.lock() += 1;
        }
        m.notify_one();
        m.notify_all();
        let stats = falter.read_imprecise();
        assert_eq!(stats.locks, 10);
        assert_eq!(stats.cond_signals, 1);
        assert_eq!(stats.cond_broadcasts, 1);
    }

    #[test]
    fn stats_display() {
        let s = Stats {
            locks: 1,
            ..Stats::default()
        };
        assert!(s.to_string().starts_with("Stats{locks: 1,"));
    }
}
