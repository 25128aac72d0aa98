// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! proto-coro: stackless coroutines on a cooperative thread-pool runtime.
//!
//! A coroutine is a plain value implementing [`Coro`]: every call to
//! `step` resumes it from the last suspension point and either suspends
//! again (`None`) or completes (`Some(output)`). No per-task stacks.
//!
//! Components:
//! - coro: `Coro` contract, `Context`, nested calls, suspension points
//! - combinators: map / and_then / boxed / spawn
//! - runtime: `Runtime` and `Routine` capability traits
//! - event_loop: worker pool + timer thread + epoll reactor thread
//! - fd / io: descriptor ownership tied to reactor registration
//! - sync: mutex/condvar monitor with an injectable hook seam
//! - event: thread-blocking one-shot latch
//! - fail: fatal OS failures and contract violations

pub mod combinators;
pub mod coro;
pub mod event;
pub mod event_loop;
pub mod fail;
#[cfg(any(test, feature = "falter"))]
pub mod falter;
pub mod fd;
pub mod io;
pub mod runtime;
pub mod sync;
#[cfg(test)]
mod testing;

pub use combinators::{AndThen, Boxed, CoroExt, Map, Spawn};
pub use coro::{Call, Context, Coro, Either, Sleep, Suspend, WaitReady, Yield};
pub use event::OneshotEvent;
pub use event_loop::{Config, EventLoop};
pub use fd::{OwnedFd, RegisteredFd};
pub use runtime::{Interest, Readiness, Routine, RoutineRef, Runtime, RuntimeRef};
