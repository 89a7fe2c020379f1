//! A TCP endpoint wrapped with per-operation deadlines and a RESP framer.
//!
//! Mirrors the original's `RESPConn`: a single mutex guards both the read
//! and write path, a per-call deadline is armed via `tokio::time::timeout`
//! (standing in for the original's `conn.SetDeadline`), and any terminal
//! I/O classification closes the endpoint before the call returns
//! (spec.md §4.2's close-on-fatal invariant).

use crate::error::IoClass;
use crate::resp;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Read one framed object off `stream`, classifying any failure.
pub(crate) async fn read_with_deadline(
    stream: &mut BufReader<TcpStream>,
    timeout: Duration,
) -> Result<Vec<u8>, IoClass> {
    match tokio::time::timeout(timeout, resp::read_object(stream)).await {
        Ok(result) => result,
        Err(_elapsed) => Err(IoClass::Timeout),
    }
}

/// Write `bytes` to `stream` in full, classifying any failure.
pub(crate) async fn write_with_deadline(
    stream: &mut BufReader<TcpStream>,
    timeout: Duration,
    bytes: &[u8],
) -> Result<(), IoClass> {
    match tokio::time::timeout(timeout, stream.write_all(bytes)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(IoClass::from_io_error(&e)),
        Err(_elapsed) => Err(IoClass::Timeout),
    }
}

/// A client-facing framed connection: `read_object`/`write`/`close` under a
/// single exclusion lock, as described in spec.md §4.2.
pub struct FramedConnection {
    state: Mutex<Option<BufReader<TcpStream>>>,
    timeout: Duration,
}

impl FramedConnection {
    pub fn new(stream: TcpStream, timeout: Duration) -> Self {
        Self {
            state: Mutex::new(Some(BufReader::new(stream))),
            timeout,
        }
    }

    /// Read one framed RESP object. A terminal classification closes the
    /// endpoint before returning (the endpoint invariant from spec.md §4.2).
    pub async fn read_object(&self) -> Result<Vec<u8>, IoClass> {
        let mut guard = self.state.lock().await;
        let stream = guard.as_mut().ok_or(IoClass::ConnectionClosed)?;
        let result = read_with_deadline(stream, self.timeout).await;
        if let Err(ref class) = result {
            if class.is_terminal() {
                *guard = None;
            }
        }
        result
    }

    /// Write `bytes` verbatim. Same close-on-fatal behavior as `read_object`.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), IoClass> {
        let mut guard = self.state.lock().await;
        let stream = guard.as_mut().ok_or(IoClass::ConnectionClosed)?;
        let result = write_with_deadline(stream, self.timeout, bytes).await;
        if let Err(ref class) = result {
            if class.is_terminal() {
                *guard = None;
            }
        }
        result
    }

    /// Idempotent close.
    pub async fn close(&self) {
        *self.state.lock().await = None;
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.is_none()
    }
}
