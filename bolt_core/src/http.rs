//! Minimal HTTP/1.1 front end: one request per accepted connection.
//!
//! Parsing reads the request line and headers up to the first blank line into
//! bounded stack buffers; the body, if any, is ignored. Recognition is
//! case-sensitive and exact. Anything else, including requests that fail
//! authentication, collapses into `Unrecognized` so the wire response cannot
//! reveal whether a path exists or why a request was refused.
//!
//! Responses are written straight to the client stream from static header
//! text plus the state's wire name; no intermediate body string is built.

use std::io::{Read, Write};

use bolt_traits::NonceStore;
use tracing::debug;

use crate::auth::RequestAuth;
use crate::state::LockState;

const MAX_LINE: usize = 512;
const MAX_HEADER_LINES: usize = 64;
const MAX_HEADER_VALUE: usize = 96;

/// Fully classified request, ready for the response matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// CORS preflight for any recognized path; never authenticated.
    Options,
    Status,
    /// Reachability probe used by clients to validate their credentials.
    Connect,
    Lock,
    Unlock,
    Unrecognized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Options,
    Status,
    Connect,
    Lock,
    Unlock,
    Unknown,
}

/// Captured header value in a fixed buffer.
#[derive(Debug, Clone, Copy)]
struct HeaderValue {
    buf: [u8; MAX_HEADER_VALUE],
    len: usize,
}

impl HeaderValue {
    fn empty() -> Self {
        Self {
            buf: [0; MAX_HEADER_VALUE],
            len: 0,
        }
    }

    fn set(&mut self, value: &[u8]) {
        let n = value.len().min(MAX_HEADER_VALUE);
        self.buf[..n].copy_from_slice(&value[..n]);
        self.len = n;
    }

    fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

/// Syntactic parse result of a single request, before authentication.
pub struct RawRequest {
    target: Target,
    nonce: HeaderValue,
    signature: HeaderValue,
}

impl RawRequest {
    pub fn nonce(&self) -> &str {
        self.nonce.as_str()
    }

    pub fn signature(&self) -> &str {
        self.signature.as_str()
    }
}

enum LineRead {
    Line(usize),
    Overflow,
    Eof,
}

/// Read one CRLF/LF-terminated line into `buf`. Oversized lines are drained
/// to the newline and reported as `Overflow`.
fn read_line<R: Read>(stream: &mut R, buf: &mut [u8; MAX_LINE]) -> std::io::Result<LineRead> {
    let mut len = 0usize;
    let mut overflow = false;
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte)?;
        if n == 0 {
            return Ok(LineRead::Eof);
        }
        match byte[0] {
            b'\n' => {
                if overflow {
                    return Ok(LineRead::Overflow);
                }
                // Strip a trailing CR.
                if len > 0 && buf[len - 1] == b'\r' {
                    len -= 1;
                }
                return Ok(LineRead::Line(len));
            }
            b => {
                if len < MAX_LINE {
                    buf[len] = b;
                    len += 1;
                } else {
                    overflow = true;
                }
            }
        }
    }
}

fn parse_request_line(line: &[u8]) -> Target {
    const OPTIONS_PATHS: [&[u8]; 4] = [
        b"OPTIONS /lock ",
        b"OPTIONS /unlock ",
        b"OPTIONS /status ",
        b"OPTIONS /connect ",
    ];
    if OPTIONS_PATHS.iter().any(|p| line.starts_with(p)) {
        return Target::Options;
    }
    if line.starts_with(b"GET /status ") {
        return Target::Status;
    }
    if line.starts_with(b"POST /lock ") {
        return Target::Lock;
    }
    if line.starts_with(b"POST /unlock ") {
        return Target::Unlock;
    }
    if line.starts_with(b"POST /connect ") {
        return Target::Connect;
    }
    Target::Unknown
}

fn trim_bytes(mut value: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = value {
        value = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = value {
        value = rest;
    }
    value
}

/// Parse one request from the stream: request line, then headers until the
/// blank line. I/O errors and protocol abuse degrade to an unknown target.
pub fn read_raw<R: Read>(stream: &mut R) -> RawRequest {
    let mut buf = [0u8; MAX_LINE];
    let mut raw = RawRequest {
        target: Target::Unknown,
        nonce: HeaderValue::empty(),
        signature: HeaderValue::empty(),
    };

    raw.target = match read_line(stream, &mut buf) {
        Ok(LineRead::Line(n)) => parse_request_line(&buf[..n]),
        Ok(LineRead::Overflow) | Ok(LineRead::Eof) => Target::Unknown,
        Err(e) => {
            debug!(error = %e, "request line read failed");
            Target::Unknown
        }
    };

    let mut terminated = false;
    for _ in 0..MAX_HEADER_LINES {
        match read_line(stream, &mut buf) {
            Ok(LineRead::Line(0)) => {
                terminated = true;
                break;
            }
            Ok(LineRead::Line(n)) => {
                let line = &buf[..n];
                if let Some(value) = line.strip_prefix(b"X-Nonce:") {
                    raw.nonce.set(trim_bytes(value));
                } else if let Some(value) = line.strip_prefix(b"X-Signature:") {
                    raw.signature.set(trim_bytes(value));
                }
            }
            Ok(LineRead::Overflow) => {
                // Keep draining; an oversized unrelated header is harmless,
                // and the auth headers never legitimately overflow.
                continue;
            }
            Ok(LineRead::Eof) => break,
            Err(e) => {
                debug!(error = %e, "header read failed");
                break;
            }
        }
    }
    if !terminated {
        raw.target = Target::Unknown;
    }
    raw
}

/// Apply authentication and produce the final request classification.
pub fn classify<S: NonceStore>(raw: &RawRequest, auth: &mut RequestAuth<S>) -> Request {
    match raw.target {
        Target::Options => Request::Options,
        Target::Unknown => Request::Unrecognized,
        authed => {
            if !auth.verify(raw.nonce(), raw.signature()) {
                return Request::Unrecognized;
            }
            match authed {
                Target::Status => Request::Status,
                Target::Connect => Request::Connect,
                Target::Lock => Request::Lock,
                Target::Unlock => Request::Unlock,
                Target::Options | Target::Unknown => Request::Unrecognized,
            }
        }
    }
}

/// Write the response for `request` given the post-transition FSM state.
pub fn respond<W: Write>(w: &mut W, request: Request, state: LockState) -> std::io::Result<()> {
    match request {
        Request::Options => w.write_all(
            b"HTTP/1.1 204 No Content\r\n\
              Access-Control-Allow-Origin: *\r\n\
              Access-Control-Allow-Headers: Content-Type, X-Nonce, X-Signature\r\n\
              Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
              Connection: close\r\n\r\n",
        ),
        Request::Status | Request::Connect => write_state(w, "200 OK", state),
        Request::Lock => {
            if matches!(state, LockState::Locked | LockState::BusyMove) {
                write_state(w, "200 OK", state)
            } else {
                write_state(w, "503 Service Unavailable", state)
            }
        }
        Request::Unlock => {
            if matches!(state, LockState::Unlocked | LockState::BusyMove) {
                write_state(w, "200 OK", state)
            } else {
                write_state(w, "503 Service Unavailable", state)
            }
        }
        Request::Unrecognized => w.write_all(
            b"HTTP/1.1 403 Forbidden\r\n\
              Access-Control-Allow-Origin: *\r\n\
              Content-Type: text/plain\r\n\
              Content-Length: 0\r\n\
              Connection: close\r\n\r\n",
        ),
    }
}

fn write_state<W: Write>(w: &mut W, status: &str, state: LockState) -> std::io::Result<()> {
    let body = state.as_str();
    write!(
        w,
        "HTTP/1.1 {status}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n\
         {body}",
        body.len()
    )
}
