//! Thin process entry point. Parses CLI flags, installs the logger, builds
//! an [`aorta::AortaServer`], and runs it until ctrl-c. None of this is part
//! of the core library (spec.md §1's "out of scope" list).

use anyhow::Result;
use aorta::AortaServer;
use clap::Parser;
use std::time::{Duration, Instant};

/// A small RESP proxy with pooled upstreams and a single-flight read-through cache.
#[derive(Parser, Debug)]
#[command(name = "aorta", version, about)]
struct Cli {
    /// Address to bind the client-facing listener on.
    #[arg(long, default_value = "127.0.0.1:6380")]
    bind: String,

    /// Shared password clients must present via AUTH.
    #[arg(long, default_value = "")]
    password: String,

    /// Per-call deadline for reads/writes on client connections, in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    client_timeout_ms: u64,

    /// Per-call deadline for reads/writes on upstream connections, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    upstream_timeout_ms: u64,

    /// How often to sweep idle upstreams and stale cache entries, in seconds.
    #[arg(long, default_value_t = 60)]
    sweep_interval_secs: u64,

    /// Upstreams idle longer than this are closed and evicted from the pool.
    #[arg(long, default_value_t = 300)]
    upstream_idle_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let server = AortaServer::bind(
        &cli.bind,
        cli.password,
        Duration::from_millis(cli.client_timeout_ms),
        Duration::from_millis(cli.upstream_timeout_ms),
    )
    .await?;

    log::info!("aorta listening on {}", server.bind_addr());

    let upstream_idle = Duration::from_secs(cli.upstream_idle_secs);
    let mut sweep = tokio::time::interval(Duration::from_secs(cli.sweep_interval_secs));

    loop {
        tokio::select! {
            _ = sweep.tick() => {
                let cutoff = Instant::now() - upstream_idle;
                let removed = server.expire_idle_upstreams(cutoff).await;
                if removed > 0 {
                    log::debug!("expired {removed} idle upstream(s)");
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                log::info!("shutting down");
                break;
            }
        }
    }

    server.shutdown();
    Ok(())
}
