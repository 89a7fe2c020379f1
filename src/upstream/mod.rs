//! An upstream RESP backend connection: lazy dial, auto-reauth,
//! auto-reconnect (spec.md §4.3). Grounded on `server_conn.go`'s
//! `ServerConn.Do`/`dial`/`do` trio, with the connected/disconnected state
//! held as `Option<BufReader<TcpStream>>` the same way `RESPConn` uses a
//! nilable `conn`/`reader` pair.

use crate::error::IoClass;
use crate::net::framed::{read_with_deadline, write_with_deadline};
use crate::resp;
use anyhow::Context;
use std::time::{Duration, Instant};
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// The result of `Upstream::do_command`. A RESP error response is returned
/// as `Resp` rather than `Io`/`Dial` — it is a valid, well-formed reply that
/// also counts as a failure for cache-insertion purposes (spec.md §9,
/// "RESP error ambiguity").
#[derive(Debug)]
pub enum UpstreamError {
    /// Dialing or the post-dial `AUTH` failed.
    Dial(anyhow::Error),
    /// A read or write on an established connection failed.
    Io(IoClass),
    /// The upstream replied with a RESP error object. Carries the raw bytes
    /// so the caller can forward them to the client verbatim.
    Resp(Vec<u8>),
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamError::Dial(e) => write!(f, "{e}"),
            UpstreamError::Io(class) => write!(f, "{class}"),
            UpstreamError::Resp(bytes) => {
                write!(f, "{}", String::from_utf8_lossy(bytes).trim_end())
            }
        }
    }
}

impl std::error::Error for UpstreamError {}

/// A backend identified by (address, password). `address` is already
/// `host:port` joined, matching the original's `conn.Address()`.
pub struct Upstream {
    address: String,
    password: String,
    timeout: Duration,
    state: Mutex<Option<BufReader<TcpStream>>>,
    last_used: std::sync::Mutex<Instant>,
}

impl Upstream {
    pub fn new(address: String, password: String, timeout: Duration) -> Self {
        Self {
            address,
            password,
            timeout,
            state: Mutex::new(None),
            last_used: std::sync::Mutex::new(Instant::now()),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Best-effort snapshot for the pool's idle-expiry sweep.
    pub fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap()
    }

    /// Send one already-framed RESP command and return the response bytes.
    /// `last_used` is bumped unconditionally under the lock before anything
    /// else happens, so an upstream that's being hammered but can't dial is
    /// never mistaken for idle by the pool's expiry sweep. Dials lazily if
    /// disconnected; re-dials transparently on the next call after a
    /// terminal I/O error closed the connection.
    pub async fn do_command(&self, command: &[u8]) -> Result<Vec<u8>, UpstreamError> {
        let mut guard = self.state.lock().await;
        *self.last_used.lock().unwrap() = Instant::now();

        if guard.is_none() {
            self.dial(&mut guard).await.map_err(UpstreamError::Dial)?;
        }

        let stream = guard.as_mut().expect("dialed above");
        if let Err(class) = write_with_deadline(stream, self.timeout, command).await {
            if class.is_terminal() {
                *guard = None;
            }
            return Err(UpstreamError::Io(class));
        }

        let stream = guard.as_mut().expect("still connected after write");
        match read_with_deadline(stream, self.timeout).await {
            Ok(bytes) => {
                if resp::is_error_object(&bytes) {
                    Err(UpstreamError::Resp(bytes))
                } else {
                    Ok(bytes)
                }
            }
            Err(class) => {
                if class.is_terminal() {
                    *guard = None;
                }
                Err(UpstreamError::Io(class))
            }
        }
    }

    async fn dial(
        &self,
        guard: &mut tokio::sync::MutexGuard<'_, Option<BufReader<TcpStream>>>,
    ) -> anyhow::Result<()> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.address))
            .await
            .context("dial timed out")?
            .with_context(|| format!("dial {}", self.address))?;
        let mut buffered = BufReader::new(stream);

        if !self.password.is_empty() {
            let auth = resp::encode_command(&[b"AUTH", self.password.as_bytes()]);
            write_with_deadline(&mut buffered, self.timeout, &auth)
                .await
                .map_err(|class| anyhow::anyhow!(class.to_string()))
                .context("auth write")?;
            let reply = read_with_deadline(&mut buffered, self.timeout)
                .await
                .map_err(|class| anyhow::anyhow!(class.to_string()))
                .context("auth read")?;
            if resp::is_error_object(&reply) {
                anyhow::bail!(
                    "auth rejected: {}",
                    String::from_utf8_lossy(&reply).trim_end()
                );
            }
        }

        **guard = Some(buffered);
        Ok(())
    }

    pub async fn close(&self) {
        *self.state.lock().await = None;
    }
}
