//! Error classification for framed I/O.
//!
//! Mirrors the original Go implementation's `wrapErr`: every I/O error
//! crossing a framed connection boundary gets bucketed into one of a small
//! number of classes so callers can decide, without matching on error
//! strings, whether the endpoint must be closed.

use std::fmt;
use std::io;

/// The three ways a framed I/O operation can fail.
#[derive(Debug)]
pub enum IoClass {
    /// The peer is gone: EOF, unexpected EOF, or "closed network connection".
    /// Terminal — the endpoint must be closed.
    ConnectionClosed,
    /// The per-call deadline elapsed. Non-terminal in principle, but every
    /// caller in this crate treats it as terminal for the endpoint.
    Timeout,
    /// The byte stream did not contain a well-formed RESP object.
    Framing(String),
}

impl fmt::Display for IoClass {
    /// The bare detail, with no client-facing reply prefix — callers that
    /// write this to a client socket add their own `aorta:`/`ERR syntax
    /// error` prefix, since the right prefix depends on which endpoint the
    /// failure occurred on (spec.md §6's exact client-facing strings).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoClass::ConnectionClosed => write!(f, "connection closed"),
            IoClass::Timeout => write!(f, "timeout"),
            IoClass::Framing(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for IoClass {}

impl IoClass {
    /// True if this classification means the endpoint must be closed before
    /// the call returns. All three classes are terminal: a closed peer and
    /// an expired deadline obviously so, but a framing error is terminal too
    /// (spec.md §4.1: "all failures are fatal to the containing endpoint") —
    /// a malformed object leaves the byte stream desynchronized, so the
    /// connection can't be trusted for a subsequent read.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IoClass::ConnectionClosed | IoClass::Timeout | IoClass::Framing(_))
    }

    /// Classify a raw `io::Error`, distinguishing "peer closed" from other
    /// failures the way the original `wrapErr` does (EOF, unexpected EOF, or
    /// the classic "closed network connection" message).
    pub fn from_io_error(err: &io::Error) -> IoClass {
        match err.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe => {
                IoClass::ConnectionClosed
            }
            io::ErrorKind::TimedOut => IoClass::Timeout,
            _ => {
                let msg = err.to_string();
                if msg.contains("closed network connection") || msg.contains("not connected") {
                    IoClass::ConnectionClosed
                } else {
                    IoClass::Framing(msg)
                }
            }
        }
    }
}

/// Wrap an arbitrary error with the `aorta: ` prefix used for unrecognized
/// failures surfaced to clients as a RESP error reply (spec.md §7).
pub fn wrap_for_client(err: &anyhow::Error) -> String {
    format!("aorta: {err}")
}
