// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Failure policy.
//!
//! Two kinds of failure exist and neither is recoverable:
//! - OS resource failures (`SysError`) are logged with the errno and
//!   abort the process.
//! - Contract violations (resuming a finished coroutine, closing a queue
//!   twice, ...) panic. Release and dev profiles build with
//!   `panic = "abort"`, so outside the test harness this is fatal too.

use std::io;
use std::panic::Location;

use thiserror::Error;

/// A failed OS call made by the runtime itself.
#[derive(Debug, Error)]
#[error("failed to {what}: {source}")]
pub struct SysError {
    pub what: &'static str,
    #[source]
    pub source: io::Error,
}

impl SysError {
    /// Capture `errno` for the operation that just failed.
    pub fn last(what: &'static str) -> Self {
        Self {
            what,
            source: io::Error::last_os_error(),
        }
    }

    pub fn new(what: &'static str, source: io::Error) -> Self {
        Self { what, source }
    }

    pub fn errno(&self) -> Option<i32> {
        self.source.raw_os_error()
    }
}

/// Convert a libc return value into a `Result`, capturing errno on `-1`.
pub(crate) fn check(ret: libc::c_int, what: &'static str) -> Result<libc::c_int, SysError> {
    if ret < 0 {
        Err(SysError::last(what))
    } else {
        Ok(ret)
    }
}

/// Log an OS failure and abort.
#[track_caller]
pub fn fatal(err: SysError) -> ! {
    let loc = Location::caller();
    log::error!(
        "{}:{}: {} (errno {})",
        loc.file(),
        loc.line(),
        err,
        err.errno().unwrap_or(0)
    );
    log::logger().flush();
    std::process::abort();
}

/// Unwrap a runtime-internal OS result or abort.
#[track_caller]
pub fn or_fatal<T>(res: Result<T, SysError>) -> T {
    match res {
        Ok(v) => v,
        Err(err) => fatal(err),
    }
}

/// Report a broken runtime invariant.
#[track_caller]
pub fn contract_violation(what: &str) -> ! {
    let loc = Location::caller();
    log::error!("{}:{}: contract violation: {}", loc.file(), loc.line(), what);
    panic!("contract violation: {what}");
}
