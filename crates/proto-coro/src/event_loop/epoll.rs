// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Reactor: epoll readiness multiplexer with a typed registration table.
//!
//! The kernel never sees a pointer. Each registration gets a generation
//! number and the event payload is `(generation << 32) | fd`; the table
//! maps the fd back to its cookie. An event whose generation no longer
//! matches (the fd was deregistered, closed and reused) is dropped.
//!
//! Registrations are `EPOLLONESHOT`: `modify` arms one notification and
//! `poll` takes the cookie out when it fires, so each arm is delivered at
//! most once.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::fail::{check, SysError};
use crate::fd::OwnedFd;
use crate::runtime::{Interest, Readiness};

/// Payload of the internal wake eventfd. Real tokens never use
/// generation `u32::MAX`, so this cannot collide.
const WAKE_TOKEN: u64 = u64::MAX;

fn token(generation: u32, fd: RawFd) -> u64 {
    ((generation as u64) << 32) | (fd as u32 as u64)
}

fn split_token(token: u64) -> (u32, RawFd) {
    ((token >> 32) as u32, token as u32 as RawFd)
}

/// `epoll_wait` timeout in whole milliseconds, rounded up so a short
/// non-zero wait never turns into a busy poll.
fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) => d.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32,
    }
}

struct Slot<T> {
    generation: u32,
    cookie: Option<T>,
}

struct Table<T> {
    slots: HashMap<RawFd, Slot<T>>,
    next_generation: u32,
}

impl<T> Table<T> {
    fn allocate_generation(&mut self) -> u32 {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        if self.next_generation == u32::MAX {
            self.next_generation = 0;
        }
        generation
    }
}

/// Reusable buffer for raw kernel events.
pub struct Events {
    raw: Vec<libc::epoll_event>,
}

impl Events {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            raw: vec![libc::epoll_event { events: 0, u64: 0 }; n.max(1)],
        }
    }
}

pub struct Epoll<T> {
    epfd: OwnedFd,
    wake_fd: OwnedFd,
    closed: AtomicBool,
    table: Mutex<Table<T>>,
}

impl<T> Epoll<T> {
    /// Create the epoll instance and its always-registered wake eventfd.
    pub fn new() -> Result<Self, SysError> {
        let epfd = check(
            unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) },
            "create epoll fd",
        )?;
        let epfd = OwnedFd::from_raw(epfd);

        let wake_fd = check(
            unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) },
            "create event fd",
        )?;
        let wake_fd = OwnedFd::from_raw(wake_fd);

        // Level-triggered and never drained: once closed, every wait
        // returns immediately.
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        check(
            unsafe {
                libc::epoll_ctl(
                    epfd.as_raw_fd(),
                    libc::EPOLL_CTL_ADD,
                    wake_fd.as_raw_fd(),
                    &mut ev,
                )
            },
            "register event fd",
        )?;

        Ok(Self {
            epfd,
            wake_fd,
            closed: AtomicBool::new(false),
            table: Mutex::new(Table {
                slots: HashMap::new(),
                next_generation: 0,
            }),
        })
    }

    fn table(&self) -> std::sync::MutexGuard<'_, Table<T>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, data: u64) -> io::Result<()> {
        let mut ev = libc::epoll_event { events, u64: data };
        let ret = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut ev) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Start tracking `fd` with no interest armed.
    pub fn register(&self, fd: RawFd) -> Result<(), SysError> {
        let mut table = self.table();
        let generation = table.allocate_generation();
        self.ctl(
            libc::EPOLL_CTL_ADD,
            fd,
            libc::EPOLLONESHOT as u32,
            token(generation, fd),
        )
        .map_err(|e| SysError::new("register fd", e))?;
        table.slots.insert(
            fd,
            Slot {
                generation,
                cookie: None,
            },
        );
        log::debug!("reactor: registered fd {fd} (generation {generation})");
        Ok(())
    }

    /// Arm a one-shot notification for `interest`; `cookie` is returned
    /// by `poll` when it fires.
    pub fn modify(&self, fd: RawFd, interest: Interest, cookie: T) -> Result<(), SysError> {
        let (replaced, result) = {
            let mut table = self.table();
            let Some(slot) = table.slots.get_mut(&fd) else {
                return Err(SysError::new(
                    "modify fd",
                    io::Error::from_raw_os_error(libc::ENOENT),
                ));
            };
            // Store before arming so a fast event always finds its cookie.
            let replaced = slot.cookie.replace(cookie);
            let data = token(slot.generation, fd);
            let events = interest.to_epoll_events() | libc::EPOLLONESHOT as u32;
            match self.ctl(libc::EPOLL_CTL_MOD, fd, events, data) {
                Ok(()) => (replaced, Ok(())),
                Err(e) => {
                    // Kernel state is unchanged; so is ours.
                    let rejected = std::mem::replace(&mut slot.cookie, replaced);
                    (rejected, Err(SysError::new("modify fd", e)))
                }
            }
        };
        if result.is_ok() && replaced.is_some() {
            log::warn!("reactor: fd {fd} re-armed while a watch was pending");
        }
        // Cookies may own resources that deregister on drop; never drop
        // them under the table lock.
        drop(replaced);
        result
    }

    /// Stop tracking `fd`, discarding any pending cookie.
    pub fn deregister(&self, fd: RawFd) -> Result<(), SysError> {
        let removed = self.table().slots.remove(&fd);
        let res = unsafe {
            libc::epoll_ctl(
                self.epfd.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };
        drop(removed);
        check(res, "deregister fd")?;
        log::debug!("reactor: deregistered fd {fd}");
        Ok(())
    }

    /// Wait up to `timeout` (forever if `None`) for ready events and
    /// append `(readiness, cookie)` pairs to `out`. Returns `Ok(None)` once
    /// the reactor is closed, otherwise the number of pairs appended.
    pub fn poll(
        &self,
        timeout: Option<Duration>,
        events: &mut Events,
        out: &mut Vec<(Readiness, T)>,
    ) -> Result<Option<usize>, SysError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }

        let wait_ms = timeout_ms(timeout);
        let n = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                events.raw.as_mut_ptr(),
                events.raw.len() as i32,
                wait_ms,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Some(0));
            }
            return Err(SysError::new("epoll wait", err));
        }

        let before = out.len();
        let mut table = self.table();
        for ev in &events.raw[..n as usize] {
            let (bits, data) = (ev.events, ev.u64);
            if data == WAKE_TOKEN {
                continue;
            }
            let (generation, fd) = split_token(data);
            match table.slots.get_mut(&fd) {
                Some(slot) if slot.generation == generation => match slot.cookie.take() {
                    Some(cookie) => out.push((Readiness::from_bits(bits), cookie)),
                    None => log::trace!("reactor: fd {fd} event with nothing armed"),
                },
                _ => log::warn!("reactor: dropped stale event for fd {fd}"),
            }
        }
        Ok(Some(out.len() - before))
    }

    /// Unblock a waiting `poll` and make every later `poll` return `None`.
    pub fn close(&self) -> Result<(), SysError> {
        self.closed.store(true, Ordering::Release);
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.wake_fd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            return Err(SysError::last("close epoll"));
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Take every pending cookie out of the table.
    pub fn take_pending(&self) -> Vec<T> {
        self.table()
            .slots
            .values_mut()
            .filter_map(|slot| slot.cookie.take())
            .collect()
    }

    pub fn registered(&self) -> usize {
        self.table().slots.len()
    }
}
