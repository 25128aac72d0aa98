// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine combinators.
//!
//! - `Map`: transform the output once, after completion
//! - `AndThen`: build a second coroutine from the first one's output
//! - `Boxed`: heap indirection with a fixed outer size
//! - `Spawn`: adapt a root coroutine into a schedulable `Routine`

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::coro::{Context, Coro};
use crate::fail::contract_violation;
use crate::runtime::{Routine, RoutineRef, RuntimeRef};

/// Applies `f` to the inner coroutine's output. `f` runs exactly once,
/// in the step that observes completion.
pub struct Map<C, F> {
    inner: C,
    f: Option<F>,
}

impl<C, F> Map<C, F> {
    pub fn new(inner: C, f: F) -> Self {
        Self { inner, f: Some(f) }
    }
}

impl<C, F, U> Coro for Map<C, F>
where
    C: Coro,
    F: FnOnce(C::Output) -> U,
{
    type Output = U;

    fn step(&mut self, cx: &Context<'_>) -> Option<U> {
        if self.f.is_none() {
            contract_violation("map resumed after completion");
        }
        let out = self.inner.step(cx)?;
        match self.f.take() {
            Some(f) => Some(f(out)),
            None => unreachable!("map function already consumed"),
        }
    }
}

enum Stage<C, D> {
    First(C),
    Second(D),
    Done,
}

/// Runs `first`, feeds its output to `f` to obtain the second coroutine,
/// then runs that. The first coroutine is dropped before the second one
/// is stepped.
pub struct AndThen<C, F, D> {
    stage: Stage<C, D>,
    f: Option<F>,
}

impl<C, F, D> AndThen<C, F, D> {
    pub fn new(first: C, f: F) -> Self {
        Self {
            stage: Stage::First(first),
            f: Some(f),
        }
    }
}

impl<C, F, D> Coro for AndThen<C, F, D>
where
    C: Coro,
    D: Coro,
    F: FnOnce(C::Output) -> D,
{
    type Output = D::Output;

    fn step(&mut self, cx: &Context<'_>) -> Option<D::Output> {
        loop {
            match &mut self.stage {
                Stage::First(first) => {
                    let out = first.step(cx)?;
                    let Some(f) = self.f.take() else {
                        unreachable!("and_then function already consumed");
                    };
                    self.stage = Stage::Second(f(out));
                }
                Stage::Second(second) => {
                    let out = second.step(cx)?;
                    self.stage = Stage::Done;
                    return Some(out);
                }
                Stage::Done => contract_violation("and_then resumed after completion"),
            }
        }
    }
}

/// Type-erased coroutine behind one heap allocation.
///
/// Needed for recursive coroutine types (a coroutine whose call slot may
/// hold another instance of itself) and for storing different
/// coroutines with the same output side by side.
pub struct Boxed<T> {
    inner: Box<dyn Coro<Output = T> + Send>,
}

impl<T> Boxed<T> {
    pub fn new<C>(coro: C) -> Self
    where
        C: Coro<Output = T> + Send + 'static,
    {
        Self {
            inner: Box::new(coro),
        }
    }
}

impl<T> Coro for Boxed<T> {
    type Output = T;

    fn step(&mut self, cx: &Context<'_>) -> Option<T> {
        self.inner.step(cx)
    }
}

impl<T> fmt::Debug for Boxed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Boxed(..)")
    }
}

/// Root task: owns a coroutine and steps it once per `Routine::step`.
///
/// The mutex serialises steps: a routine that re-armed itself may be
/// picked up by another worker before the current step has returned.
/// The output of the coroutine is dropped; use `map` to deliver it.
pub struct Spawn<C> {
    coro: Mutex<Option<C>>,
}

impl<C> Spawn<C>
where
    C: Coro + Send + 'static,
{
    pub fn new(coro: C) -> Arc<Self> {
        Arc::new(Self {
            coro: Mutex::new(Some(coro)),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.coro
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl<C> Routine for Spawn<C>
where
    C: Coro + Send + 'static,
{
    fn step(self: Arc<Self>, rt: &RuntimeRef) {
        let this: RoutineRef = self.clone();
        let mut slot = self.coro.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(coro) = slot.as_mut() else {
            drop(slot);
            contract_violation("routine stepped after completion");
        };
        let cx = Context::new(rt, &this);
        if coro.step(&cx).is_some() {
            *slot = None;
            log::trace!("routine finished");
        }
    }
}

/// Combinator methods for every coroutine.
pub trait CoroExt: Coro + Sized {
    fn map<F, U>(self, f: F) -> Map<Self, F>
    where
        F: FnOnce(Self::Output) -> U,
    {
        Map::new(self, f)
    }

    fn and_then<F, D>(self, f: F) -> AndThen<Self, F, D>
    where
        F: FnOnce(Self::Output) -> D,
        D: Coro,
    {
        AndThen::new(self, f)
    }

    fn boxed(self) -> Boxed<Self::Output>
    where
        Self: Send + 'static,
    {
        Boxed::new(self)
    }

    fn spawn(self) -> Arc<Spawn<Self>>
    where
        Self: Send + 'static,
    {
        Spawn::new(self)
    }
}

impl<C: Coro> CoroExt for C {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coro::{Call, Either, Suspend, Yield};
    use crate::testing::{Event, Recorder};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Suspends `n` times, then returns `value`.
    struct After {
        n: u32,
        value: i32,
    }

    impl Coro for After {
        type Output = i32;

        fn step(&mut self, _cx: &Context<'_>) -> Option<i32> {
            if self.n == u32::MAX {
                contract_violation("After resumed after completion");
            }
            if self.n > 0 {
                self.n -= 1;
                return None;
            }
            self.n = u32::MAX;
            Some(self.value)
        }
    }

    fn after(n: u32, value: i32) -> After {
        After { n, value }
    }

    #[test]
    fn map_runs_once_after_completion() {
        let rec = Recorder::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let mut c = after(2, 123).map(move |v| {
            flag.store(true, Ordering::SeqCst);
            v * 2
        });
        rec.with_context(|cx| {
            assert_eq!(c.step(cx), None);
            assert!(!ran.load(Ordering::SeqCst));
            assert_eq!(c.step(cx), None);
            assert!(!ran.load(Ordering::SeqCst));
            assert_eq!(c.step(cx), Some(246));
            assert!(ran.load(Ordering::SeqCst));
        });
    }

    #[test]
    #[should_panic(expected = "map resumed after completion")]
    fn map_rejects_step_after_completion() {
        let rec = Recorder::new();
        let mut c = after(0, 1).map(|v| v);
        rec.with_context(|cx| {
            assert_eq!(c.step(cx), Some(1));
            c.step(cx);
        });
    }

    #[test]
    fn and_then_picks_second_at_runtime() {
        let rec = Recorder::new();
        let mut c = after(1, 3).and_then(|n| {
            if n > 2 {
                Either::Left(after(n as u32, n * 10))
            } else {
                Either::Right(Suspend::new())
            }
        });
        rec.with_context(|cx| {
            // first: 1 suspension; second: 3 suspensions.
            for _ in 0..4 {
                assert_eq!(c.step(cx), None);
            }
            assert_eq!(c.step(cx), Some(Either::Left(30)));
        });
    }

    #[test]
    #[should_panic(expected = "and_then resumed after completion")]
    fn and_then_rejects_step_after_completion() {
        let rec = Recorder::new();
        let mut c = after(0, 1).and_then(|v| after(0, v));
        rec.with_context(|cx| {
            assert_eq!(c.step(cx), Some(1));
            c.step(cx);
        });
    }

    /// Sums n + (n-1) + ... + 0, one recursive call per level.
    struct SumDown {
        n: u64,
        inner: Call<Boxed<u64>>,
        pause: Suspend,
    }

    fn sum_down(n: u64) -> SumDown {
        SumDown {
            n,
            inner: Call::new(),
            pause: Suspend::new(),
        }
    }

    impl Coro for SumDown {
        type Output = u64;

        fn step(&mut self, cx: &Context<'_>) -> Option<u64> {
            if self.n == 0 {
                self.pause.step(cx)?;
                return Some(0);
            }
            let n = self.n;
            let rest = self.inner.call(cx, || sum_down(n - 1).boxed())?;
            Some(n + rest)
        }
    }

    #[test]
    fn boxed_allows_recursive_coroutines() {
        let rec = Recorder::new();
        let mut c = sum_down(10);
        rec.with_context(|cx| {
            assert_eq!(c.step(cx), None);
            assert_eq!(c.step(cx), Some(55));
        });
    }

    #[test]
    fn boxed_stores_heterogeneous_coroutines() {
        let rec = Recorder::new();
        let mut list: Vec<Boxed<i32>> = vec![
            after(0, 1).boxed(),
            after(2, 2).boxed(),
            Suspend::new().map(|()| 3).boxed(),
        ];
        let mut done = Vec::new();
        rec.with_context(|cx| {
            while !list.is_empty() {
                let mut i = 0;
                while i < list.len() {
                    if let Some(v) = list[i].step(cx) {
                        done.push(v);
                        drop(list.remove(i));
                    } else {
                        i += 1;
                    }
                }
            }
        });
        done.sort();
        assert_eq!(done, vec![1, 2, 3]);
    }

    /// Yields once, then records completion.
    struct YieldThenCount {
        y: Yield,
        hits: Arc<AtomicU32>,
    }

    impl Coro for YieldThenCount {
        type Output = ();

        fn step(&mut self, cx: &Context<'_>) -> Option<()> {
            self.y.step(cx)?;
            self.hits.fetch_add(1, Ordering::SeqCst);
            Some(())
        }
    }

    #[test]
    fn spawn_drives_one_resumption_per_step() {
        let rec = Recorder::new();
        let rt: RuntimeRef = rec.clone();
        let hits = Arc::new(AtomicU32::new(0));
        let task = YieldThenCount {
            y: Yield::new(),
            hits: hits.clone(),
        }
        .spawn();

        task.clone().step(&rt);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(rec.events(), vec![Event::Submit]);
        assert!(!task.is_finished());

        // The context's "self" is the spawned routine itself.
        let resubmitted = rec.take_submitted();
        assert_eq!(resubmitted.len(), 1);
        resubmitted[0].clone().step(&rt);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
    }

    #[test]
    #[should_panic(expected = "routine stepped after completion")]
    fn spawn_rejects_step_after_completion() {
        let rec = Recorder::new();
        let rt: RuntimeRef = rec.clone();
        let task = after(0, 7).spawn();
        task.clone().step(&rt);
        task.step(&rt);
    }
}
