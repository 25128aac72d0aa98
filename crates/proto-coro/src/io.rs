// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Non-blocking I/O on registered descriptors.
//!
//! Each helper tries the syscall once. On `EAGAIN` it arms a readiness
//! watch for the calling routine and returns `None`; the caller suspends
//! and retries when resumed. `EINTR` is retried in place.

use std::io;
use std::os::unix::io::AsRawFd;

use crate::coro::Context;
use crate::fd::{OwnedFd, RegisteredFd};
use crate::runtime::Interest;

fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

fn interrupted(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Interrupted
}

/// Run `op` until it stops failing with `EINTR`. `None` means the
/// descriptor would block and `interest` has been armed.
fn attempt<T>(
    fd: &RegisteredFd,
    interest: Interest,
    cx: &Context<'_>,
    mut op: impl FnMut() -> isize,
    done: impl FnOnce(isize) -> T,
) -> Option<io::Result<T>> {
    loop {
        let ret = op();
        if ret >= 0 {
            return Some(Ok(done(ret)));
        }
        let err = io::Error::last_os_error();
        if interrupted(&err) {
            continue;
        }
        if would_block(&err) {
            log::trace!("fd {} would block, arming {:?}", fd.as_raw_fd(), interest);
            cx.resume_when_ready(fd.as_raw_fd(), interest);
            return None;
        }
        return Some(Err(err));
    }
}

/// Read into `buf`. `Some(Ok(0))` is end of stream.
pub fn read(fd: &RegisteredFd, buf: &mut [u8], cx: &Context<'_>) -> Option<io::Result<usize>> {
    let raw = fd.as_raw_fd();
    attempt(
        fd,
        Interest::Readable,
        cx,
        || unsafe { libc::read(raw, buf.as_mut_ptr().cast(), buf.len()) },
        |n| n as usize,
    )
}

/// Write from `buf`; may be partial.
pub fn write(fd: &RegisteredFd, buf: &[u8], cx: &Context<'_>) -> Option<io::Result<usize>> {
    let raw = fd.as_raw_fd();
    attempt(
        fd,
        Interest::Writable,
        cx,
        || unsafe { libc::write(raw, buf.as_ptr().cast(), buf.len()) },
        |n| n as usize,
    )
}

/// Accept one connection from a listening socket. The new descriptor is
/// non-blocking and close-on-exec.
pub fn accept(listener: &RegisteredFd, cx: &Context<'_>) -> Option<io::Result<OwnedFd>> {
    let raw = listener.as_raw_fd();
    attempt(
        listener,
        Interest::Readable,
        cx,
        || unsafe {
            libc::accept4(
                raw,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            ) as isize
        },
        |fd| OwnedFd::from_raw(fd as i32),
    )
}
