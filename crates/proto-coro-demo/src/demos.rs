// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Small coroutines showing suspension, nested calls, yield and sleep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use proto_coro::{
    Call, Context, Coro, CoroExt, EventLoop, OneshotEvent, Routine, RoutineRef, RuntimeRef,
    Sleep, Suspend, Yield,
};

use crate::output;

#[derive(Default)]
enum StepsState {
    #[default]
    First,
    Second(Suspend),
    Third(Suspend),
    Done,
}

/// Prints three lines across three steps, then returns 123.
#[derive(Default)]
pub struct ThreeSteps {
    state: StepsState,
}

impl Coro for ThreeSteps {
    type Output = i32;

    fn step(&mut self, cx: &Context<'_>) -> Option<i32> {
        loop {
            match &mut self.state {
                StepsState::First => {
                    output::step("first step");
                    self.state = StepsState::Second(Suspend::new());
                }
                StepsState::Second(s) => {
                    s.step(cx)?;
                    output::step("second step");
                    self.state = StepsState::Third(Suspend::new());
                }
                StepsState::Third(s) => {
                    s.step(cx)?;
                    output::step("third step");
                    self.state = StepsState::Done;
                    return Some(123);
                }
                StepsState::Done => panic!("ThreeSteps resumed after completion"),
            }
        }
    }
}

/// Calls `ThreeSteps` five times in a row and sums the results.
#[derive(Default)]
pub struct CallFive {
    i: usize,
    sum: i32,
    inner: Call<ThreeSteps>,
}

impl Coro for CallFive {
    type Output = i32;

    fn step(&mut self, cx: &Context<'_>) -> Option<i32> {
        while self.i < 5 {
            if !self.inner.is_active() {
                output::step(&format!("calling for the {}th time", self.i));
            }
            let got = self.inner.call(cx, ThreeSteps::default)?;
            output::step(&format!("got {got}"));
            self.sum += got;
            self.i += 1;
        }
        Some(self.sum)
    }
}

enum NapState {
    Start,
    Yielding(Yield),
    Sleeping(Sleep),
}

/// Yields, then sleeps, printing the worker thread at each point.
pub struct YieldSleep {
    state: NapState,
    nap: Duration,
}

impl YieldSleep {
    pub fn new(nap: Duration) -> Self {
        Self {
            state: NapState::Start,
            nap,
        }
    }
}

impl Coro for YieldSleep {
    type Output = ();

    fn step(&mut self, cx: &Context<'_>) -> Option<()> {
        loop {
            match &mut self.state {
                NapState::Start => {
                    output::step("started");
                    self.state = NapState::Yielding(Yield::new());
                }
                NapState::Yielding(y) => {
                    y.step(cx)?;
                    output::step("yielded");
                    self.state = NapState::Sleeping(Sleep::for_duration(self.nap));
                }
                NapState::Sleeping(s) => {
                    s.step(cx)?;
                    output::step("slept");
                    return Some(());
                }
            }
        }
    }
}

/// Root routine for coroutines driven by hand; it is never scheduled.
struct Manual;

impl Routine for Manual {
    fn step(self: Arc<Self>, _rt: &RuntimeRef) {}
}

/// Step `coro` on the current thread until it completes. Only valid for
/// coroutines that suspend without re-arming.
fn drive<C: Coro>(mut coro: C, rt: &RuntimeRef) -> (C::Output, usize) {
    let this: RoutineRef = Arc::new(Manual);
    let cx = Context::new(rt, &this);
    let mut steps = 1;
    loop {
        if let Some(out) = coro.step(&cx) {
            return (out, steps);
        }
        steps += 1;
    }
}

pub fn run_steps() {
    output::banner("three steps, driven by hand");
    let lp = EventLoop::new(1);
    let (value, steps) = drive(ThreeSteps::default(), &lp.runtime());
    output::result("result", format!("{value} after {steps} steps"));
}

pub fn run_calls() {
    output::banner("five nested calls, driven by hand");
    let lp = EventLoop::new(1);
    let (value, steps) = drive(CallFive::default(), &lp.runtime());
    output::result("sum", format!("{value} after {steps} steps"));
}

pub fn run_yield_sleep(workers: usize) {
    output::banner("yield then sleep on the event loop");
    let lp = EventLoop::new(workers);
    lp.start();

    let done = Arc::new(OneshotEvent::new());
    let began = Instant::now();
    {
        let done = done.clone();
        lp.spawn(YieldSleep::new(Duration::from_millis(100)).map(move |()| done.fire()));
    }
    done.wait();
    output::result("elapsed", format!("{:?}", began.elapsed()));

    lp.stop();
}
