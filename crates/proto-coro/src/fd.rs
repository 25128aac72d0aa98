// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Descriptor ownership.
//!
//! `OwnedFd` closes its descriptor exactly once. `RegisteredFd` also
//! keeps the descriptor registered with a runtime's reactor, and always
//! deregisters before the descriptor is closed or handed out, so the
//! reactor never holds an entry for a number the kernel may reuse.

use std::mem;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};

use crate::runtime::RuntimeRef;

const INVALID_FD: RawFd = -1;

/// Move-only owner of a raw descriptor. `-1` is the empty state.
#[derive(Debug)]
pub struct OwnedFd {
    fd: RawFd,
}

impl OwnedFd {
    /// Take ownership of `fd`. Negative values produce an empty owner.
    pub fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: if fd < 0 { INVALID_FD } else { fd },
        }
    }

    /// Adopt the descriptor of a std I/O object (e.g. `TcpListener`).
    pub fn from_io<T: IntoRawFd>(io: T) -> Self {
        Self::from_raw(io.into_raw_fd())
    }

    pub fn is_valid(&self) -> bool {
        self.fd != INVALID_FD
    }

    /// Give up ownership without closing.
    pub fn release(&mut self) -> RawFd {
        mem::replace(&mut self.fd, INVALID_FD)
    }

    /// Close now. No-op when empty.
    pub fn reset(&mut self) {
        let fd = self.release();
        if fd != INVALID_FD && unsafe { libc::close(fd) } < 0 {
            log::warn!(
                "failed to close fd {fd}: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    pub fn swap(&mut self, other: &mut OwnedFd) {
        mem::swap(&mut self.fd, &mut other.fd);
    }
}

impl Default for OwnedFd {
    fn default() -> Self {
        Self { fd: INVALID_FD }
    }
}

impl AsRawFd for OwnedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl IntoRawFd for OwnedFd {
    fn into_raw_fd(mut self) -> RawFd {
        self.release()
    }
}

impl Drop for OwnedFd {
    fn drop(&mut self) {
        self.reset();
    }
}

/// An `OwnedFd` registered with a runtime's reactor for its lifetime.
#[derive(Default)]
pub struct RegisteredFd {
    fd: OwnedFd,
    rt: Option<RuntimeRef>,
}

impl RegisteredFd {
    /// Register `fd` with `rt`. An empty `fd` is left unregistered.
    pub fn new(fd: OwnedFd, rt: &RuntimeRef) -> Self {
        if !fd.is_valid() {
            return Self { fd, rt: None };
        }
        rt.register_fd(fd.as_raw_fd());
        Self {
            fd,
            rt: Some(rt.clone()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.fd.is_valid()
    }

    /// Deregister and hand back plain ownership.
    pub fn into_owned(mut self) -> OwnedFd {
        self.detach()
    }

    /// Deregister, then close.
    pub fn reset(&mut self) {
        self.detach().reset();
    }

    pub fn swap(&mut self, other: &mut RegisteredFd) {
        mem::swap(self, other);
    }

    fn detach(&mut self) -> OwnedFd {
        let fd = mem::take(&mut self.fd);
        if let Some(rt) = self.rt.take() {
            if fd.is_valid() {
                rt.deregister_fd(fd.as_raw_fd());
            }
        }
        fd
    }
}

impl AsRawFd for RegisteredFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl std::fmt::Debug for RegisteredFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredFd")
            .field("fd", &self.fd.as_raw_fd())
            .field("registered", &self.rt.is_some())
            .finish()
    }
}

impl Drop for RegisteredFd {
    fn drop(&mut self) {
        self.reset();
    }
}
