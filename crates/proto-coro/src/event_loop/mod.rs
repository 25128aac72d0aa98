// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The runtime: a fixed worker pool, one timer thread and one reactor
//! thread, joined by a FIFO run queue.
//!
//! Workers pop a routine and step it once. The timer and reactor threads
//! only ever push back into the run queue. There is no work stealing and
//! no thread affinity; consecutive resumptions of one task may run on
//! different workers.

pub mod epoll;
pub mod run_queue;
pub mod timer_queue;

use std::mem;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

use crate::combinators::Spawn;
use crate::coro::Coro;
use crate::fail::{contract_violation, fatal, or_fatal, SysError};
use crate::runtime::{Interest, RoutineRef, Runtime, RuntimeRef};
use crate::sync::{NoHooks, SyncHooks};

use self::epoll::{Epoll, Events};
use self::run_queue::RunQueue;
use self::timer_queue::TimerQueue;

const DEFAULT_THREAD_NAME: &str = "pc";
const DEFAULT_MAX_EVENTS: usize = 16;
const WORKERS_ENV: &str = "PROTO_CORO_WORKERS";

/// Construction parameters for an [`EventLoop`].
#[derive(Debug, Clone)]
pub struct Config {
    workers: usize,
    thread_name: String,
    max_events: usize,
}

impl Config {
    pub fn new(workers: usize) -> Self {
        if workers == 0 {
            contract_violation("event loop needs at least one worker");
        }
        Self {
            workers,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            max_events: DEFAULT_MAX_EVENTS,
        }
    }

    /// Worker count from `PROTO_CORO_WORKERS`, else one per available CPU.
    pub fn from_env() -> Self {
        let from_var = match std::env::var(WORKERS_ENV) {
            Ok(v) => match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => Some(n),
                _ => {
                    log::warn!("ignoring invalid {WORKERS_ENV}={v:?}");
                    None
                }
            },
            Err(_) => None,
        };
        let workers = from_var.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        });
        Self::new(workers)
    }

    /// Prefix for thread names: `{prefix}-worker-{i}`, `{prefix}-timer`,
    /// `{prefix}-reactor`.
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Readiness events taken from the kernel per reactor wakeup.
    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

/// State shared by all runtime threads and every `RuntimeRef`.
struct Core<H: SyncHooks> {
    tasks: RunQueue<RoutineRef, H>,
    timers: TimerQueue<RoutineRef, H>,
    reactor: Epoll<RoutineRef>,
}

impl<H: SyncHooks> Runtime for Core<H> {
    fn submit(&self, routine: RoutineRef) {
        self.tasks.push(routine);
    }

    fn schedule_after(&self, deadline: Instant, routine: RoutineRef) {
        self.timers.push(deadline, routine);
    }

    fn watch_readiness(&self, fd: RawFd, interest: Interest, routine: RoutineRef) {
        or_fatal(self.reactor.modify(fd, interest, routine));
    }

    fn register_fd(&self, fd: RawFd) {
        or_fatal(self.reactor.register(fd));
    }

    fn deregister_fd(&self, fd: RawFd) {
        or_fatal(self.reactor.deregister(fd));
    }
}

enum Lifecycle {
    Idle,
    Running(Vec<thread::JoinHandle<()>>),
    Stopped,
}

pub struct EventLoop<H: SyncHooks = NoHooks> {
    config: Config,
    core: Arc<Core<H>>,
    lifecycle: Mutex<Lifecycle>,
}

impl EventLoop {
    pub fn new(workers: usize) -> Self {
        Self::with_config(Config::new(workers))
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_hooks(config, NoHooks)
    }
}

impl<H: SyncHooks> EventLoop<H> {
    /// Build a loop whose queues report to `hooks`.
    pub fn with_hooks(config: Config, hooks: H) -> Self {
        let core = Core {
            tasks: RunQueue::with_hooks(hooks.clone()),
            timers: TimerQueue::with_hooks(hooks),
            reactor: or_fatal(Epoll::new()),
        };
        Self {
            config,
            core: Arc::new(core),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle for coroutines and descriptors. Valid until `stop`.
    pub fn runtime(&self) -> RuntimeRef {
        self.core.clone()
    }

    /// Wrap `coro` in a routine and queue its first step.
    pub fn spawn<C>(&self, coro: C)
    where
        C: Coro + Send + 'static,
    {
        self.core.submit(Spawn::new(coro));
    }

    /// Spawn every runtime thread. Valid once.
    pub fn start(&self) {
        let mut life = self.lifecycle();
        if !matches!(*life, Lifecycle::Idle) {
            drop(life);
            contract_violation("event loop started twice");
        }

        let prefix = &self.config.thread_name;
        let mut threads = Vec::with_capacity(self.config.workers + 2);
        for id in 0..self.config.workers {
            let core = self.core.clone();
            threads.push(spawn_thread(format!("{prefix}-worker-{id}"), move || {
                worker_loop(core)
            }));
        }
        {
            let core = self.core.clone();
            threads.push(spawn_thread(format!("{prefix}-timer"), move || {
                timer_loop(&core)
            }));
        }
        {
            let core = self.core.clone();
            let max_events = self.config.max_events;
            threads.push(spawn_thread(format!("{prefix}-reactor"), move || {
                reactor_loop(&core, max_events)
            }));
        }

        log::debug!(
            "event loop started: {} workers, prefix {prefix:?}",
            self.config.workers
        );
        *life = Lifecycle::Running(threads);
    }

    /// Close the run queue, the timer queue and the reactor, then join
    /// every thread in that order. Valid once, after `start`.
    pub fn stop(&self) {
        let threads = {
            let mut life = self.lifecycle();
            match mem::replace(&mut *life, Lifecycle::Stopped) {
                Lifecycle::Running(threads) => threads,
                Lifecycle::Idle => {
                    *life = Lifecycle::Idle;
                    drop(life);
                    contract_violation("event loop stopped before start");
                }
                Lifecycle::Stopped => {
                    drop(life);
                    contract_violation("event loop stopped twice");
                }
            }
        };

        self.core.tasks.close();
        self.core.timers.close();
        or_fatal(self.core.reactor.close());

        for handle in threads {
            let name = handle.thread().name().unwrap_or("?").to_string();
            if handle.join().is_err() {
                log::error!("runtime thread {name} panicked");
            }
        }

        self.release_stranded();
        log::debug!("event loop stopped");
    }

    /// Drop every routine still held by the queues or the reactor. Routines
    /// may own descriptors that keep the runtime alive, so this breaks the
    /// cycle. Both queues must already be closed.
    fn release_stranded(&self) {
        let mut stranded = self.core.tasks.drain_all();
        while let Some(routine) = self.core.timers.pop() {
            stranded.push(routine);
        }
        stranded.extend(self.core.reactor.take_pending());
        if !stranded.is_empty() {
            log::debug!("dropping {} stranded routines", stranded.len());
        }
        drop(stranded);
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle(), Lifecycle::Running(_))
    }
}

impl<H: SyncHooks> Runtime for EventLoop<H> {
    fn submit(&self, routine: RoutineRef) {
        self.core.submit(routine);
    }

    fn schedule_after(&self, deadline: Instant, routine: RoutineRef) {
        self.core.schedule_after(deadline, routine);
    }

    fn watch_readiness(&self, fd: RawFd, interest: Interest, routine: RoutineRef) {
        self.core.watch_readiness(fd, interest, routine);
    }

    fn register_fd(&self, fd: RawFd) {
        self.core.register_fd(fd);
    }

    fn deregister_fd(&self, fd: RawFd) {
        self.core.deregister_fd(fd);
    }
}

impl<H: SyncHooks> Drop for EventLoop<H> {
    fn drop(&mut self) {
        let never_started = {
            let mut life = self.lifecycle();
            match *life {
                Lifecycle::Running(_) => false,
                Lifecycle::Stopped => return,
                Lifecycle::Idle => {
                    *life = Lifecycle::Stopped;
                    true
                }
            }
        };
        if !never_started {
            self.stop();
            return;
        }
        // No thread ever ran; close the queues so draining never blocks.
        self.core.tasks.close();
        self.core.timers.close();
        self.release_stranded();
    }
}

fn spawn_thread<F>(name: String, body: F) -> thread::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    match thread::Builder::new().name(name).spawn(body) {
        Ok(handle) => handle,
        Err(e) => fatal(SysError::new("spawn runtime thread", e)),
    }
}

fn worker_loop<H: SyncHooks>(core: Arc<Core<H>>) {
    log::debug!("worker up");
    let rt: RuntimeRef = core.clone();
    while let Some(routine) = core.tasks.pop() {
        log::trace!("worker stepping routine");
        routine.step(&rt);
    }
    log::debug!("worker down");
}

fn timer_loop<H: SyncHooks>(core: &Core<H>) {
    log::debug!("timer up");
    while let Some(routine) = core.timers.pop() {
        core.tasks.push(routine);
    }
    log::debug!("timer down");
}

fn reactor_loop<H: SyncHooks>(core: &Core<H>, max_events: usize) {
    log::debug!("reactor up");
    let mut events = Events::with_capacity(max_events);
    let mut ready = Vec::with_capacity(max_events);
    while let Some(n) = or_fatal(core.reactor.poll(None, &mut events, &mut ready)) {
        log::trace!("reactor woke with {n} ready routines");
        for (_readiness, routine) in ready.drain(..) {
            core.tasks.push(routine);
        }
    }
    log::debug!("reactor down");
}
