// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Toy HTTP server: prints each request head and answers `200 OK`.
//!
//! One listener routine accepts connections and spawns one routine per
//! connection. Everything runs on the event loop's workers; no thread
//! ever blocks on a socket.

use std::io;
use std::net::TcpListener;
use std::sync::Arc;

use proto_coro::fail::{fatal, SysError};
use proto_coro::{
    io as pio, Call, Context, Coro, CoroExt, EventLoop, OneshotEvent, OwnedFd, RegisteredFd,
};

use crate::output;

const HEADER_END: &[u8] = b"\r\n\r\n";
const RESPONSE: &[u8] = b"HTTP/1.0 200 OK\r\nContent-Length: 3\r\n\r\nok\n";

/// Buffered byte reader over a registered socket.
pub struct BufReader {
    fd: RegisteredFd,
    buf: Box<[u8; 4096]>,
    filled: usize,
    pos: usize,
}

impl BufReader {
    pub fn new(fd: RegisteredFd) -> Self {
        Self {
            fd,
            buf: Box::new([0; 4096]),
            filled: 0,
            pos: 0,
        }
    }

    /// Next byte. `Some(Ok(None))` is end of stream; `None` means the
    /// socket is drained and a readiness watch is armed.
    pub fn next_byte(&mut self, cx: &Context<'_>) -> Option<io::Result<Option<u8>>> {
        if self.pos == self.filled {
            self.pos = 0;
            self.filled = match pio::read(&self.fd, &mut self.buf[..], cx)? {
                Ok(n) => n,
                Err(e) => return Some(Err(e)),
            };
            if self.filled == 0 {
                return Some(Ok(None));
            }
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Some(Ok(Some(b)))
    }

    pub fn into_inner(self) -> RegisteredFd {
        self.fd
    }
}

/// Reads bytes up to and including the blank line ending a request head.
/// Hands the reader back along with the head.
pub struct ReadHeader {
    reader: Option<BufReader>,
    head: Vec<u8>,
}

impl ReadHeader {
    pub fn new(reader: BufReader) -> Self {
        Self {
            reader: Some(reader),
            head: Vec::new(),
        }
    }
}

impl Coro for ReadHeader {
    type Output = io::Result<(String, BufReader)>;

    fn step(&mut self, cx: &Context<'_>) -> Option<Self::Output> {
        let Some(reader) = self.reader.as_mut() else {
            panic!("ReadHeader resumed after completion");
        };
        while !self.head.ends_with(HEADER_END) {
            match reader.next_byte(cx)? {
                Ok(Some(b)) => self.head.push(b),
                Ok(None) => break,
                Err(e) => return Some(Err(e)),
            }
        }
        let head = String::from_utf8_lossy(&self.head).into_owned();
        let reader = self.reader.take()?;
        Some(Ok((head, reader)))
    }
}

enum ServeState {
    Head(Call<ReadHeader>),
    Reply { fd: RegisteredFd, sent: usize },
}

/// Serves a single connection.
pub struct RequestServe {
    state: ServeState,
}

impl RequestServe {
    pub fn new(fd: RegisteredFd) -> Self {
        let mut call = Call::new();
        call.start(ReadHeader::new(BufReader::new(fd)));
        Self {
            state: ServeState::Head(call),
        }
    }
}

impl Coro for RequestServe {
    type Output = ();

    fn step(&mut self, cx: &Context<'_>) -> Option<()> {
        loop {
            match &mut self.state {
                ServeState::Head(call) => match call.poll(cx)? {
                    Ok((head, reader)) => {
                        output::step(&format!("received header:\n{}", head.trim_end()));
                        self.state = ServeState::Reply {
                            fd: reader.into_inner(),
                            sent: 0,
                        };
                    }
                    Err(e) => {
                        log::warn!("dropping connection: {e}");
                        return Some(());
                    }
                },
                ServeState::Reply { fd, sent } => {
                    match pio::write(fd, &RESPONSE[*sent..], cx)? {
                        Ok(n) => *sent += n,
                        Err(e) => {
                            log::warn!("reply failed: {e}");
                            return Some(());
                        }
                    }
                    if *sent == RESPONSE.len() {
                        return Some(());
                    }
                }
            }
        }
    }
}

/// Accepts forever, spawning a `RequestServe` per connection.
pub struct Listener {
    sfd: RegisteredFd,
    accepted: u64,
}

impl Coro for Listener {
    type Output = ();

    fn step(&mut self, cx: &Context<'_>) -> Option<()> {
        loop {
            let conn = match pio::accept(&self.sfd, cx)? {
                Ok(fd) => fd,
                Err(e) => fatal(SysError::new("accept", e)),
            };
            self.accepted += 1;
            log::debug!("accepted connection #{}", self.accepted);
            let conn = RegisteredFd::new(conn, cx.runtime());
            cx.runtime().submit(RequestServe::new(conn).spawn());
        }
    }
}

pub fn run(port: u16, workers: usize) {
    let listener = match TcpListener::bind(("0.0.0.0", port)) {
        Ok(l) => l,
        Err(e) => fatal(SysError::new("bind to a port", e)),
    };
    if let Err(e) = listener.set_nonblocking(true) {
        fatal(SysError::new("make listener non-blocking", e));
    }
    let addr = listener.local_addr().map(|a| a.to_string()).unwrap_or_default();

    let lp = EventLoop::new(workers);
    lp.start();

    let sfd = RegisteredFd::new(OwnedFd::from_io(listener), &lp.runtime());
    output::banner(&format!("listening on {addr}"));

    // The listener never finishes; this waits until the process is killed.
    let done = Arc::new(OneshotEvent::new());
    {
        let done = done.clone();
        lp.spawn(Listener { sfd, accepted: 0 }.map(move |()| done.fire()));
    }
    done.wait();
    lp.stop();
}
