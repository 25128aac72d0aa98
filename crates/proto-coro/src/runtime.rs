// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Capability traits linking coroutines to the scheduler.
//!
//! A [`Routine`] is a type-erased root task; a [`Runtime`] accepts
//! routines and resubmits them later (immediately, after a deadline, or
//! on fd readiness). `EventLoop` is the one real implementation.

use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Instant;

/// I/O interest for a readiness watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
    Both,
}

impl Interest {
    pub(crate) fn to_epoll_events(self) -> u32 {
        match self {
            Interest::Readable => libc::EPOLLIN as u32,
            Interest::Writable => libc::EPOLLOUT as u32,
            Interest::Both => (libc::EPOLLIN | libc::EPOLLOUT) as u32,
        }
    }
}

/// Readiness bits reported by the reactor for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness(u32);

impl Readiness {
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_readable(self) -> bool {
        self.0 & libc::EPOLLIN as u32 != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & libc::EPOLLOUT as u32 != 0
    }

    /// Error or hang-up. Reported regardless of requested interest.
    pub fn is_closed(self) -> bool {
        self.0 & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0
    }
}

/// A schedulable unit: one call to `step` runs one resumption.
///
/// The scheduler never calls `step` on the same routine from two threads
/// at once, as long as every suspension arranges exactly one resubmission.
pub trait Routine: Send + Sync + 'static {
    fn step(self: Arc<Self>, rt: &RuntimeRef);
}

pub type RoutineRef = Arc<dyn Routine>;

/// Scheduling capability handed to every coroutine through `Context`.
pub trait Runtime: Send + Sync + 'static {
    /// Queue for execution on any worker.
    fn submit(&self, routine: RoutineRef);

    /// Queue for execution once `deadline` has passed.
    fn schedule_after(&self, deadline: Instant, routine: RoutineRef);

    /// Arm a one-shot readiness watch on a registered fd. Must be re-armed
    /// for every wait.
    fn watch_readiness(&self, fd: RawFd, interest: Interest, routine: RoutineRef);

    /// Start tracking `fd` with no interest.
    fn register_fd(&self, fd: RawFd);

    /// Stop tracking `fd`. Must happen before the fd is closed.
    fn deregister_fd(&self, fd: RawFd);
}

pub type RuntimeRef = Arc<dyn Runtime>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_maps_to_epoll_bits() {
        assert_eq!(Interest::Readable.to_epoll_events(), libc::EPOLLIN as u32);
        assert_eq!(Interest::Writable.to_epoll_events(), libc::EPOLLOUT as u32);
        assert_eq!(
            Interest::Both.to_epoll_events(),
            (libc::EPOLLIN | libc::EPOLLOUT) as u32
        );
    }

    #[test]
    fn readiness_bits() {
        let r = Readiness::from_bits((libc::EPOLLIN | libc::EPOLLHUP) as u32);
        assert!(r.is_readable());
        assert!(!r.is_writable());
        assert!(r.is_closed());
    }
}
