//! Per-client protocol state machine (spec.md §4.6). Grounded on
//! `proxy/server.go`'s `Server.handle`, generalized from its hand-rolled
//! `switch`-on-string dispatch into the same verb table shape, run as a
//! `tokio::spawn`ed task per session.

use crate::cache::{fingerprint, Cache};
use crate::error::{self, IoClass};
use crate::net::framed::FramedConnection;
use crate::pool::Pool;
use crate::resp;
use crate::upstream::{Upstream, UpstreamError};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct SessionConfig {
    pub password: String,
    pub upstream_timeout: Duration,
}

struct State {
    authenticated: bool,
    upstream: Option<Arc<Upstream>>,
}

/// Run one client session to completion. Never panics on a misbehaving
/// client; every protocol violation ends the session cleanly.
pub async fn run(client: FramedConnection, pool: Arc<Pool>, cache: Arc<Cache>, config: Arc<SessionConfig>) {
    let mut state = State {
        authenticated: false,
        upstream: None,
    };

    loop {
        let raw = match client.read_object().await {
            Ok(raw) => raw,
            Err(IoClass::ConnectionClosed) | Err(IoClass::Timeout) => return,
            Err(IoClass::Framing(_)) => {
                let _ = client.write(&resp::encode_error("ERR syntax error")).await;
                return;
            }
        };

        if raw.first() != Some(&b'*') {
            let _ = client.write(&resp::encode_error("ERR syntax error")).await;
            return;
        }

        let args = match resp::parse_command_args(&raw) {
            Ok(args) if !args.is_empty() => args,
            _ => {
                let _ = client.write(&resp::encode_error("ERR syntax error")).await;
                return;
            }
        };

        let verb = args[0].to_ascii_uppercase();

        if verb == b"QUIT" {
            return;
        }

        if verb != b"AUTH" && !state.authenticated {
            let _ = client
                .write(&resp::encode_error("NOAUTH Authentication required."))
                .await;
            return;
        }

        match verb.as_slice() {
            b"AUTH" => {
                if args.len() != 2 {
                    let _ = client
                        .write(&resp::encode_error(
                            "ERR wrong number of arguments for 'auth' command",
                        ))
                        .await;
                } else if args[1] == config.password.as_bytes() {
                    state.authenticated = true;
                    let _ = client.write(resp::OK).await;
                } else {
                    state.authenticated = false;
                    let _ = client.write(&resp::encode_error("ERR invalid password")).await;
                }
                continue;
            }
            b"PROXY" => {
                if args.len() != 4 {
                    let _ = client
                        .write(&resp::encode_error(
                            "ERR wrong number of arguments for 'proxy' command",
                        ))
                        .await;
                    continue;
                }
                let host = String::from_utf8_lossy(&args[1]).into_owned();
                let port = String::from_utf8_lossy(&args[2]).into_owned();
                let password = String::from_utf8_lossy(&args[3]).into_owned();
                let upstream = pool.get(&host, &port, &password, config.upstream_timeout).await;
                state.upstream = Some(upstream);
                let _ = client.write(resp::OK).await;
                continue;
            }
            _ => {}
        }

        let upstream = match &state.upstream {
            Some(u) => u.clone(),
            None => {
                let _ = client
                    .write(&resp::encode_error("aorta: proxy destination not set"))
                    .await;
                continue;
            }
        };

        let (min_timestamp, forward_args, forward_bytes) = if verb == b"CACHED" {
            if args.len() < 3 {
                let _ = client
                    .write(&resp::encode_error(
                        "ERR wrong number of arguments for 'cached' command",
                    ))
                    .await;
                continue;
            }
            let ttl_secs: Option<i64> = std::str::from_utf8(&args[1]).ok().and_then(|s| s.parse().ok());
            let ttl_secs = match ttl_secs {
                Some(secs) => secs,
                None => {
                    let _ = client.write(&resp::encode_error("ERR syntax error")).await;
                    continue;
                }
            };
            let min_timestamp = if ttl_secs >= 0 {
                Instant::now()
                    .checked_sub(Duration::from_secs(ttl_secs as u64))
                    .unwrap_or_else(Instant::now)
            } else {
                // `ttl_secs == i64::MIN` has no in-range negation; treat it
                // as the largest representable future offset instead of
                // panicking on the overflow.
                let future_secs = ttl_secs.checked_neg().map(|n| n as u64).unwrap_or(i64::MAX as u64);
                Instant::now() + Duration::from_secs(future_secs)
            };
            let stripped = args[2..].to_vec();
            let refs: Vec<&[u8]> = stripped.iter().map(|a| a.as_slice()).collect();
            let bytes = resp::encode_command(&refs);
            (min_timestamp, stripped, bytes)
        } else {
            (Instant::now(), args.clone(), raw.clone())
        };

        let key = fingerprint(upstream.address(), upstream.password(), &forward_args);
        let result = cache
            .fetch(key, min_timestamp, async {
                upstream.do_command(&forward_bytes).await
            })
            .await;

        match result {
            Ok(bytes) => {
                if client.write(&bytes).await.is_err() {
                    return;
                }
            }
            Err(UpstreamError::Resp(bytes)) => {
                if client.write(&bytes).await.is_err() {
                    return;
                }
            }
            Err(UpstreamError::Dial(e)) => {
                let msg = error::wrap_for_client(&e);
                let _ = client.write(&resp::encode_error(&msg)).await;
            }
            Err(UpstreamError::Io(class)) => {
                let msg = format!("aorta: {class}");
                let _ = client.write(&resp::encode_error(&msg)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn spawn_session() -> (Arc<Pool>, Arc<Cache>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let pool = Arc::new(Pool::new());
        let cache = Arc::new(Cache::new());
        let cfg = Arc::new(SessionConfig {
            password: "pw".to_string(),
            upstream_timeout: StdDuration::from_millis(300),
        });

        let pool_clone = pool.clone();
        let cache_clone = cache.clone();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let framed = FramedConnection::new(sock, StdDuration::from_secs(2));
            run(framed, pool_clone, cache_clone, cfg).await;
        });

        let client = TcpStream::connect(addr).await.unwrap();
        (pool, cache, client)
    }

    async fn write_command(stream: &mut TcpStream, args: &[&[u8]]) {
        stream.write_all(&resp::encode_command(args)).await.unwrap();
    }

    async fn read_reply(stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        buf.truncate(n);
        buf
    }

    #[tokio::test]
    async fn no_auth_rejects_and_closes() {
        let (_pool, _cache, mut client) = spawn_session().await;
        write_command(&mut client, &[b"PROXY", b"localhost", b"9999", b"x"]).await;
        let reply = read_reply(&mut client).await;
        assert_eq!(reply, b"-NOAUTH Authentication required.\r\n");

        let mut buf = [0u8; 1];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "session should close the socket after NOAUTH");
    }

    #[tokio::test]
    async fn bad_auth_then_good_auth() {
        let (_pool, _cache, mut client) = spawn_session().await;
        write_command(&mut client, &[b"AUTH", b"wrong"]).await;
        assert_eq!(read_reply(&mut client).await, b"-ERR invalid password\r\n");

        write_command(&mut client, &[b"AUTH", b"pw"]).await;
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");
    }

    #[tokio::test]
    async fn authenticated_no_target_replies_with_destination_error() {
        let (_pool, _cache, mut client) = spawn_session().await;
        write_command(&mut client, &[b"AUTH", b"pw"]).await;
        read_reply(&mut client).await;

        write_command(&mut client, &[b"PING"]).await;
        assert_eq!(read_reply(&mut client).await, b"-aorta: proxy destination not set\r\n");
    }

    #[tokio::test]
    async fn proxy_to_unreachable_reports_refused_without_closing() {
        let (_pool, _cache, mut client) = spawn_session().await;
        write_command(&mut client, &[b"AUTH", b"pw"]).await;
        read_reply(&mut client).await;
        write_command(&mut client, &[b"PROXY", b"127.0.0.1", b"1", b""]).await;
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");

        write_command(&mut client, &[b"PING"]).await;
        let reply = read_reply(&mut client).await;
        let text = String::from_utf8_lossy(&reply);
        assert!(text.starts_with("-aorta: "));
    }

    #[tokio::test]
    async fn cached_command_with_bad_ttl_replies_syntax_error_and_continues() {
        let (_pool, _cache, mut client) = spawn_session().await;
        write_command(&mut client, &[b"AUTH", b"pw"]).await;
        read_reply(&mut client).await;
        write_command(&mut client, &[b"PROXY", b"127.0.0.1", b"1", b""]).await;
        read_reply(&mut client).await;

        write_command(&mut client, &[b"CACHED", b"nope", b"PING"]).await;
        assert_eq!(read_reply(&mut client).await, b"-ERR syntax error\r\n");

        // Session must still be alive.
        write_command(&mut client, &[b"AUTH", b"pw"]).await;
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");
    }

    #[tokio::test]
    async fn switching_targets_proxies_to_the_new_upstream() {
        async fn backend(reply: &'static [u8]) -> std::net::SocketAddr {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                if let Ok((mut sock, _)) = listener.accept().await {
                    let mut buf = vec![0u8; 256];
                    loop {
                        match sock.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {
                                if sock.write_all(reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            });
            addr
        }

        let addr_a = backend(b"$3\r\nbar\r\n").await;
        let addr_b = backend(b"$-1\r\n").await;

        let (_pool, _cache, mut client) = spawn_session().await;
        write_command(&mut client, &[b"AUTH", b"pw"]).await;
        read_reply(&mut client).await;

        write_command(
            &mut client,
            &[b"PROXY", addr_a.ip().to_string().as_bytes(), addr_a.port().to_string().as_bytes(), b""],
        )
        .await;
        read_reply(&mut client).await;
        write_command(&mut client, &[b"GET", b"foo"]).await;
        assert_eq!(read_reply(&mut client).await, b"$3\r\nbar\r\n");

        write_command(
            &mut client,
            &[b"PROXY", addr_b.ip().to_string().as_bytes(), addr_b.port().to_string().as_bytes(), b""],
        )
        .await;
        read_reply(&mut client).await;
        write_command(&mut client, &[b"GET", b"foo"]).await;
        assert_eq!(read_reply(&mut client).await, b"$-1\r\n");
    }
}
