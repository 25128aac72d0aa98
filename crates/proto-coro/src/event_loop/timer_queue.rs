// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Deadline queue with a single consumer (the timer thread).
//!
//! `pop` sleeps until the earliest deadline passes. A push that moves
//! the earliest deadline forward wakes the consumer so it can re-arm its
//! wait. Once closed, remaining items are handed out immediately without
//! waiting for their deadlines.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::fail::contract_violation;
use crate::sync::{Monitor, NoHooks, SyncHooks};

struct Entry<T> {
    at: Instant,
    // Insertion order; equal deadlines pop first-in first-out.
    seq: u64,
    value: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at
            .cmp(&other.at)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

struct State<T> {
    // BinaryHeap is a max heap, we need a min heap.
    heap: BinaryHeap<Reverse<Entry<T>>>,
    next_seq: u64,
    closed: bool,
}

impl<T> State<T> {
    fn earliest(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.0.at)
    }
}

pub struct TimerQueue<T, H: SyncHooks = NoHooks> {
    state: Monitor<State<T>, H>,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self::with_hooks(NoHooks)
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, H: SyncHooks> TimerQueue<T, H> {
    pub fn with_hooks(hooks: H) -> Self {
        Self {
            state: Monitor::with_hooks(
                State {
                    heap: BinaryHeap::new(),
                    next_seq: 0,
                    closed: false,
                },
                hooks,
            ),
        }
    }

    pub fn push(&self, at: Instant, value: T) {
        let wake = {
            let mut st = self.state.lock();
            let wake = st.earliest().map_or(true, |earliest| at < earliest);
            let seq = st.next_seq;
            st.next_seq += 1;
            st.heap.push(Reverse(Entry { at, seq, value }));
            wake
        };
        if wake {
            self.state.notify_one();
        }
    }

    /// Wait for the earliest deadline, then remove and return its item.
    /// After `close`, returns remaining items at once, then `None`.
    pub fn pop(&self) -> Option<T> {
        let mut st = self.state.lock();
        loop {
            if st.closed {
                return st.heap.pop().map(|e| e.0.value);
            }
            match st.earliest() {
                None => st = self.state.wait(st),
                Some(at) if at <= Instant::now() => {
                    return st.heap.pop().map(|e| e.0.value);
                }
                Some(at) => st = self.state.wait_until(st, at),
            }
        }
    }

    /// One-time transition; a second close is a contract violation.
    pub fn close(&self) {
        {
            let mut st = self.state.lock();
            if st.closed {
                drop(st);
                contract_violation("timer queue closed twice");
            }
            st.closed = true;
        }
        self.state.notify_all();
    }
}
