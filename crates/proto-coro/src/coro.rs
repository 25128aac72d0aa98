// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Resumable computations.
//!
//! A coroutine is a hand-written state machine: its private fields
//! survive suspension and an explicit state enum records where to resume.
//! `step` returns `None` while suspended and `Some(output)` exactly once.
//! Stepping again after completion is a contract violation.
//!
//! Suspension points:
//! - [`Suspend`]: pause with nothing re-armed (the driver decides when
//!   to step again).
//! - [`Yield`], [`Sleep`], [`WaitReady`]: pause after arranging the root
//!   routine's resubmission through the runtime.
//! - [`Call::poll`]: pause while a nested coroutine is still pending.
//!
//! Whoever returns `None` from inside a scheduled routine must first
//! have arranged exactly one resubmission, or the task is lost.

use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use crate::fail::contract_violation;
use crate::runtime::{Interest, RoutineRef, RuntimeRef};

/// A resumable computation.
pub trait Coro {
    type Output;

    fn step(&mut self, cx: &Context<'_>) -> Option<Self::Output>;
}

/// Per-step environment: the runtime and the root routine being stepped.
/// Only valid for the duration of one `step` call.
pub struct Context<'a> {
    rt: &'a RuntimeRef,
    this: &'a RoutineRef,
}

impl<'a> Context<'a> {
    pub fn new(rt: &'a RuntimeRef, this: &'a RoutineRef) -> Self {
        Self { rt, this }
    }

    pub fn runtime(&self) -> &'a RuntimeRef {
        self.rt
    }

    /// Handle to the root routine, for arming a resubmission.
    pub fn this(&self) -> RoutineRef {
        self.this.clone()
    }

    /// Put the root routine back on the run queue.
    pub fn resubmit(&self) {
        self.rt.submit(self.this());
    }

    /// Resubmit the root routine once `deadline` has passed.
    pub fn resume_at(&self, deadline: Instant) {
        self.rt.schedule_after(deadline, self.this());
    }

    /// Resubmit the root routine when `fd` becomes ready.
    pub fn resume_when_ready(&self, fd: RawFd, interest: Interest) {
        self.rt.watch_readiness(fd, interest, self.this());
    }
}

/// Storage for one nested call at a time.
///
/// `start` places a callee; `poll` steps it and, on completion, drops it
/// before returning its output, freeing the slot for the next callee.
/// Callers needing several callee types use an enum such as [`Either`].
pub struct Call<C> {
    callee: Option<C>,
}

impl<C> Default for Call<C> {
    fn default() -> Self {
        Self { callee: None }
    }
}

impl<C: Coro> Call<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.callee.is_some()
    }

    pub fn start(&mut self, callee: C) {
        if self.callee.is_some() {
            contract_violation("nested call started while another is in flight");
        }
        self.callee = Some(callee);
    }

    pub fn poll(&mut self, cx: &Context<'_>) -> Option<C::Output> {
        let Some(callee) = self.callee.as_mut() else {
            contract_violation("polled an empty call slot");
        };
        let out = callee.step(cx)?;
        self.callee = None;
        Some(out)
    }

    /// Start `callee` unless one is already in flight, then poll.
    pub fn call(&mut self, cx: &Context<'_>, callee: impl FnOnce() -> C) -> Option<C::Output> {
        if self.callee.is_none() {
            self.callee = Some(callee());
        }
        self.poll(cx)
    }
}

/// One of two coroutine (or output) types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Either<L, R> {
    Left(L),
    Right(R),
}

impl<L, R> Either<L, R> {
    pub fn left(self) -> Option<L> {
        match self {
            Either::Left(l) => Some(l),
            Either::Right(_) => None,
        }
    }

    pub fn right(self) -> Option<R> {
        match self {
            Either::Left(_) => None,
            Either::Right(r) => Some(r),
        }
    }
}

impl<L: Coro, R: Coro> Coro for Either<L, R> {
    type Output = Either<L::Output, R::Output>;

    fn step(&mut self, cx: &Context<'_>) -> Option<Self::Output> {
        match self {
            Either::Left(l) => l.step(cx).map(Either::Left),
            Either::Right(r) => r.step(cx).map(Either::Right),
        }
    }
}

/// Shared state of the single-point suspensions below.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    Start,
    Suspended,
    Done,
}

impl Phase {
    fn advance(&mut self, arm: impl FnOnce()) -> Option<()> {
        match self {
            Phase::Start => {
                *self = Phase::Suspended;
                arm();
                None
            }
            Phase::Suspended => {
                *self = Phase::Done;
                Some(())
            }
            Phase::Done => contract_violation("suspension point resumed after completion"),
        }
    }
}

/// Suspend once without re-arming anything.
#[derive(Debug, Default)]
pub struct Suspend {
    phase: Phase,
}

impl Suspend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Coro for Suspend {
    type Output = ();

    fn step(&mut self, _cx: &Context<'_>) -> Option<()> {
        self.phase.advance(|| ())
    }
}

/// Suspend once, going straight back to the run queue.
#[derive(Debug, Default)]
pub struct Yield {
    phase: Phase,
}

impl Yield {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Coro for Yield {
    type Output = ();

    fn step(&mut self, cx: &Context<'_>) -> Option<()> {
        self.phase.advance(|| cx.resubmit())
    }
}

#[derive(Debug, Clone, Copy)]
enum WakeAt {
    Deadline(Instant),
    // Resolved against the clock at the first step.
    Delay(Duration),
}

/// Suspend until a deadline.
#[derive(Debug)]
pub struct Sleep {
    wake: WakeAt,
    phase: Phase,
}

impl Sleep {
    pub fn until(deadline: Instant) -> Self {
        Self {
            wake: WakeAt::Deadline(deadline),
            phase: Phase::Start,
        }
    }

    /// Sleep for `delay` measured from the first step, not from construction.
    pub fn for_duration(delay: Duration) -> Self {
        Self {
            wake: WakeAt::Delay(delay),
            phase: Phase::Start,
        }
    }
}

impl Coro for Sleep {
    type Output = ();

    fn step(&mut self, cx: &Context<'_>) -> Option<()> {
        let wake = self.wake;
        self.phase.advance(|| {
            let deadline = match wake {
                WakeAt::Deadline(at) => at,
                WakeAt::Delay(d) => Instant::now() + d,
            };
            cx.resume_at(deadline);
        })
    }
}

/// Suspend until a registered fd reports readiness.
#[derive(Debug)]
pub struct WaitReady {
    fd: RawFd,
    interest: Interest,
    phase: Phase,
}

impl WaitReady {
    pub fn new(fd: RawFd, interest: Interest) -> Self {
        Self {
            fd,
            interest,
            phase: Phase::Start,
        }
    }
}

impl Coro for WaitReady {
    type Output = ();

    fn step(&mut self, cx: &Context<'_>) -> Option<()> {
        let (fd, interest) = (self.fd, self.interest);
        self.phase.advance(|| cx.resume_when_ready(fd, interest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, Recorder};

    /// Suspends twice, then returns 123.
    #[derive(Default)]
    struct TwoSuspends {
        state: u8,
    }

    impl Coro for TwoSuspends {
        type Output = i32;

        fn step(&mut self, _cx: &Context<'_>) -> Option<i32> {
            match self.state {
                0 | 1 => {
                    self.state += 1;
                    None
                }
                2 => {
                    self.state = 3;
                    Some(123)
                }
                _ => contract_violation("TwoSuspends resumed after completion"),
            }
        }
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    enum CounterState {
        #[default]
        Start,
        AfterFirst,
        AfterSecond,
        Done,
    }

    /// Fields survive suspension.
    #[derive(Default)]
    struct Counter {
        i: u32,
        state: CounterState,
    }

    impl Coro for Counter {
        type Output = u32;

        fn step(&mut self, _cx: &Context<'_>) -> Option<u32> {
            match self.state {
                CounterState::Start => {
                    self.i += 1;
                    self.state = CounterState::AfterFirst;
                    None
                }
                CounterState::AfterFirst => {
                    self.i += 1;
                    self.state = CounterState::AfterSecond;
                    None
                }
                CounterState::AfterSecond => {
                    self.i += 1;
                    self.state = CounterState::Done;
                    Some(self.i)
                }
                CounterState::Done => contract_violation("Counter resumed after completion"),
            }
        }
    }

    /// Calls `TwoSuspends` five times and sums the results.
    #[derive(Default)]
    struct CallFive {
        i: usize,
        sum: i32,
        callee: Call<TwoSuspends>,
    }

    impl Coro for CallFive {
        type Output = i32;

        fn step(&mut self, cx: &Context<'_>) -> Option<i32> {
            while self.i < 5 {
                let res = self.callee.call(cx, TwoSuspends::default)?;
                self.sum += res;
                self.i += 1;
            }
            Some(self.sum)
        }
    }

    #[test]
    fn two_suspensions_then_value() {
        let rec = Recorder::new();
        rec.with_context(|cx| {
            let mut c = TwoSuspends::default();
            assert_eq!(c.step(cx), None);
            assert_eq!(c.step(cx), None);
            assert_eq!(c.step(cx), Some(123));
        });
    }

    #[test]
    #[should_panic(expected = "resumed after completion")]
    fn step_after_completion_is_rejected() {
        let rec = Recorder::new();
        rec.with_context(|cx| {
            let mut c = TwoSuspends::default();
            while c.step(cx).is_none() {}
            c.step(cx);
        });
    }

    #[test]
    fn private_fields_survive_suspension() {
        let rec = Recorder::new();
        rec.with_context(|cx| {
            let mut c = Counter::default();
            assert_eq!(c.step(cx), None);
            assert_eq!(c.i, 1);
            assert_eq!(c.step(cx), None);
            assert_eq!(c.i, 2);
            assert_eq!(c.step(cx), Some(3));
            assert_eq!(c.i, 3);
        });
        assert!(rec.events().is_empty());
    }

    #[test]
    fn nested_calls_reuse_slot() {
        let rec = Recorder::new();
        rec.with_context(|cx| {
            let mut c = CallFive::default();
            for _ in 0..10 {
                assert_eq!(c.step(cx), None);
                assert!(c.callee.is_active());
            }
            assert_eq!(c.step(cx), Some(615));
            assert!(!c.callee.is_active());
        });
    }

    #[test]
    #[should_panic(expected = "nested call started while another is in flight")]
    fn call_slot_holds_one_callee() {
        let mut call = Call::<TwoSuspends>::new();
        call.start(TwoSuspends::default());
        call.start(TwoSuspends::default());
    }

    #[test]
    fn either_dispatches_to_active_variant() {
        let rec = Recorder::new();
        rec.with_context(|cx| {
            let mut slot: Call<Either<TwoSuspends, Suspend>> = Call::new();
            slot.start(Either::Right(Suspend::new()));
            assert_eq!(slot.poll(cx), None);
            assert_eq!(slot.poll(cx), Some(Either::Right(())));

            slot.start(Either::Left(TwoSuspends::default()));
            let out = std::iter::repeat_with(|| slot.poll(cx)).flatten().next();
            assert_eq!(out.and_then(Either::left), Some(123));
        });
    }

    #[test]
    fn yield_resubmits_self() {
        let rec = Recorder::new();
        rec.with_context(|cx| {
            let mut y = Yield::new();
            assert_eq!(y.step(cx), None);
            assert_eq!(y.step(cx), Some(()));
        });
        assert_eq!(rec.events(), vec![Event::Submit]);
    }

    #[test]
    fn sleep_arms_timer() {
        let rec = Recorder::new();
        let deadline = Instant::now() + Duration::from_secs(3);
        rec.with_context(|cx| {
            let mut s = Sleep::until(deadline);
            assert_eq!(s.step(cx), None);
            assert_eq!(s.step(cx), Some(()));
        });
        assert_eq!(rec.events(), vec![Event::After(deadline)]);
    }

    #[test]
    fn sleep_for_measures_from_first_step() {
        let rec = Recorder::new();
        let mut s = Sleep::for_duration(Duration::from_millis(100));
        std::thread::sleep(Duration::from_millis(20));
        let before = Instant::now();
        rec.with_context(|cx| assert_eq!(s.step(cx), None));
        match rec.events().as_slice() {
            [Event::After(at)] => assert!(*at >= before + Duration::from_millis(100)),
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn wait_ready_arms_watch() {
        let rec = Recorder::new();
        rec.with_context(|cx| {
            let mut w = WaitReady::new(7, Interest::Writable);
            assert_eq!(w.step(cx), None);
            assert_eq!(w.step(cx), Some(()));
        });
        assert_eq!(rec.events(), vec![Event::Watch(7, Interest::Writable)]);
    }
}
