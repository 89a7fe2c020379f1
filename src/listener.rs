//! Accept loop plus the external-facing counters described in spec.md §4.7
//! and §6. Grounded on `cli/src/socket/server.rs`'s `SocketServer::start`/
//! `accept_loop`/`shutdown` shape, adapted from a Unix socket to TCP and
//! from "announce via channel" to "spawn a session task directly" (matching
//! `proxy/server.go`'s `Listen`/`handle`, which has no hub to announce to).

use crate::cache::Cache;
use crate::pool::Pool;
use crate::session::{self, SessionConfig};
use crate::net::framed::FramedConnection;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Counters {
    total_clients: AtomicU64,
    current_clients: AtomicU64,
}

/// The running proxy: bound listener, upstream pool, cache, and counters.
pub struct AortaServer {
    bind: String,
    pool: Arc<Pool>,
    cache: Arc<Cache>,
    counters: Arc<Counters>,
    accept_handle: JoinHandle<()>,
}

impl AortaServer {
    /// Bind `bind_addr` and start the accept loop. Every accepted connection
    /// runs its session in its own task (spec.md §5).
    pub async fn bind(
        bind_addr: &str,
        password: String,
        client_timeout: Duration,
        upstream_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("bind {bind_addr}"))?;
        log::info!("aorta listening on {bind_addr}");

        let pool = Arc::new(Pool::new());
        let cache = Arc::new(Cache::new());
        let counters = Arc::new(Counters::default());
        let session_config = Arc::new(SessionConfig {
            password,
            upstream_timeout,
        });

        let accept_handle = tokio::spawn(accept_loop(
            listener,
            pool.clone(),
            cache.clone(),
            counters.clone(),
            session_config,
            client_timeout,
        ));

        Ok(Self {
            bind: bind_addr.to_string(),
            pool,
            cache,
            counters,
            accept_handle,
        })
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache.hits()
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache.misses()
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    pub fn current_clients(&self) -> u64 {
        self.counters.current_clients.load(Ordering::Relaxed)
    }

    pub fn total_clients(&self) -> u64 {
        self.counters.total_clients.load(Ordering::Relaxed)
    }

    /// Periodically sweep idle upstreams and stale cache entries. Callers
    /// decide the cadence; the core has no internal timer (spec.md §9,
    /// "Global state: none in the core").
    pub async fn expire_idle_upstreams(&self, cutoff: std::time::Instant) -> usize {
        self.pool.expire(cutoff).await
    }

    pub fn expire_stale_cache_entries(&self, max_count: usize, cutoff: std::time::Instant) -> usize {
        self.cache.expire(max_count, cutoff)
    }

    /// Stop accepting new connections. Existing sessions run to completion.
    pub fn shutdown(self) {
        self.accept_handle.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    pool: Arc<Pool>,
    cache: Arc<Cache>,
    counters: Arc<Counters>,
    session_config: Arc<SessionConfig>,
    client_timeout: Duration,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                log::debug!("new client: {peer}");
                counters.total_clients.fetch_add(1, Ordering::Relaxed);
                counters.current_clients.fetch_add(1, Ordering::Relaxed);

                let pool = pool.clone();
                let cache = cache.clone();
                let counters = counters.clone();
                let session_config = session_config.clone();

                tokio::spawn(async move {
                    let framed = FramedConnection::new(stream, client_timeout);
                    session::run(framed, pool, cache, session_config).await;
                    counters.current_clients.fetch_sub(1, Ordering::Relaxed);
                    log::debug!("closed client: {peer}");
                });
            }
            Err(e) => {
                log::warn!("accept error: {e}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn counts_connections() {
        let server = AortaServer::bind(
            "127.0.0.1:0",
            "pw".to_string(),
            Duration::from_millis(200),
            Duration::from_millis(200),
        )
        .await
        .unwrap();
        let addr = server.bind_addr().to_string();

        let mut client = TcpStream::connect(&addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(server.total_clients(), 1);
        assert_eq!(server.current_clients(), 1);

        client.write_all(b"*1\r\n$4\r\nQUIT\r\n").await.unwrap();
        let mut buf = [0u8; 1];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(server.current_clients(), 0);
        assert_eq!(server.total_clients(), 1);

        server.shutdown();
    }
}
