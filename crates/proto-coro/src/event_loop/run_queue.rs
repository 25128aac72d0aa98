// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Blocking multi-producer/multi-consumer FIFO of ready routines.
//!
//! `pop` blocks until an item arrives or the queue is closed. After
//! `close`, consumers drain what is left and then see `None`.

use std::collections::VecDeque;

use crate::fail::contract_violation;
use crate::sync::{Monitor, NoHooks, SyncHooks};

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct RunQueue<T, H: SyncHooks = NoHooks> {
    state: Monitor<State<T>, H>,
}

impl<T> RunQueue<T> {
    pub fn new() -> Self {
        Self::with_hooks(NoHooks)
    }
}

impl<T> Default for RunQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, H: SyncHooks> RunQueue<T, H> {
    pub fn with_hooks(hooks: H) -> Self {
        Self {
            state: Monitor::with_hooks(
                State {
                    items: VecDeque::new(),
                    closed: false,
                },
                hooks,
            ),
        }
    }

    /// Enqueue and wake one blocked consumer. Never fails; items pushed
    /// after `close` are still handed to consumers that have not exited.
    pub fn push(&self, value: T) {
        self.state.lock().items.push_back(value);
        self.state.notify_one();
    }

    /// Block until an item is available, or the queue is closed and empty.
    pub fn pop(&self) -> Option<T> {
        let mut st = self.state.lock();
        loop {
            if let Some(value) = st.items.pop_front() {
                return Some(value);
            }
            if st.closed {
                return None;
            }
            st = self.state.wait(st);
        }
    }

    /// One-time transition; a second close is a contract violation.
    pub fn close(&self) {
        {
            let mut st = self.state.lock();
            if st.closed {
                drop(st);
                contract_violation("run queue closed twice");
            }
            st.closed = true;
        }
        self.state.notify_all();
    }

    /// Remove everything still queued (used after consumers have exited).
    pub fn drain_all(&self) -> Vec<T> {
        self.state.lock().items.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::falter::Falter;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let q = RunQueue::new();
        for i in 0..5 {
            q.push(i);
        }
        q.close();
        let got: Vec<_> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn close_drains_then_ends() {
        let q = RunQueue::new();
        q.push(1);
        q.push(2);
        q.close();
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
        assert_eq!(q.pop(), None);
    }

    #[test]
    #[should_panic(expected = "run queue closed twice")]
    fn double_close_is_rejected() {
        let q = RunQueue::<u32>::new();
        q.close();
        q.close();
    }

    #[test]
    fn close_releases_blocked_consumers() {
        let q = Arc::new(RunQueue::<u32>::new());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = q.clone();
                thread::spawn(move || q.pop())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        q.close();
        for c in consumers {
            assert_eq!(c.join().unwrap(), None);
        }
    }

    #[test]
    fn blocked_consumers_drain_all_items() {
        const N: u32 = 1000;
        let q = Arc::new(RunQueue::new());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = q.clone();
                thread::spawn(move || std::iter::from_fn(|| q.pop()).collect::<Vec<u32>>())
            })
            .collect();
        for i in 0..N {
            q.push(i);
        }
        q.close();

        let mut seen = HashSet::new();
        for c in consumers {
            for v in c.join().unwrap() {
                assert!(seen.insert(v), "item {v} delivered twice");
            }
        }
        assert_eq!(seen.len(), N as usize);
    }

    #[test]
    fn survives_fault_injection() {
        const PRODUCERS: u32 = 4;
        const PER_PRODUCER: u32 = 500;
        let falter = Falter::new();
        let q = Arc::new(RunQueue::with_hooks(falter.clone()));

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let q = q.clone();
                thread::spawn(move || std::iter::from_fn(|| q.pop()).count())
            })
            .collect();
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        q.push(p * PER_PRODUCER + i);
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        q.close();

        let total: usize = consumers.into_iter().map(|c| c.join().unwrap()).sum();
        assert_eq!(total, (PRODUCERS * PER_PRODUCER) as usize);
        let stats = falter.read_imprecise();
        assert!(stats.locks >= (PRODUCERS * PER_PRODUCER) as u64);
        assert!(stats.cond_signals >= (PRODUCERS * PER_PRODUCER) as u64);
    }
}
