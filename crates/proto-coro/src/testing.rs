// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Unit-test runtime that records scheduling requests instead of acting.

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::coro::Context;
use crate::runtime::{Interest, Routine, RoutineRef, Runtime, RuntimeRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Submit,
    After(Instant),
    Watch(RawFd, Interest),
    Register(RawFd),
    Deregister(RawFd),
}

#[derive(Default)]
pub(crate) struct Recorder {
    events: Mutex<Vec<Event>>,
    submitted: Mutex<Vec<RoutineRef>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Routines handed to `submit`, oldest first.
    pub fn take_submitted(&self) -> Vec<RoutineRef> {
        std::mem::take(&mut *self.submitted.lock().unwrap())
    }

    /// Run `f` with a context whose root routine does nothing.
    pub fn with_context<R>(self: &Arc<Self>, f: impl FnOnce(&Context<'_>) -> R) -> R {
        let rt: RuntimeRef = self.clone();
        let this: RoutineRef = Arc::new(Inert);
        f(&Context::new(&rt, &this))
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Runtime for Recorder {
    fn submit(&self, routine: RoutineRef) {
        self.record(Event::Submit);
        self.submitted.lock().unwrap().push(routine);
    }

    fn schedule_after(&self, deadline: Instant, _routine: RoutineRef) {
        self.record(Event::After(deadline));
    }

    fn watch_readiness(&self, fd: RawFd, interest: Interest, _routine: RoutineRef) {
        self.record(Event::Watch(fd, interest));
    }

    fn register_fd(&self, fd: RawFd) {
        self.record(Event::Register(fd));
    }

    fn deregister_fd(&self, fd: RawFd) {
        self.record(Event::Deregister(fd));
    }
}

struct Inert;

impl Routine for Inert {
    fn step(self: Arc<Self>, _rt: &RuntimeRef) {}
}
