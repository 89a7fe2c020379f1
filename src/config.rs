//! Proxy configuration: the four constructor inputs named in spec.md §6,
//! plus JSON file persistence and environment-variable loading for the
//! ambient stack. Grounded on `botster_hub_rs/src/config.rs`'s
//! `Config::load`/`save` pair, adapted to take an explicit path (the host
//! binary decides where config lives; the library has no opinion on
//! `~/.aorta`) and to read `AORTA_*` environment variables the way
//! container-friendly services usually prefer over a config file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub bind: String,
    pub password: String,
    pub client_timeout_ms: u64,
    pub upstream_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:6380".to_string(),
            password: String::new(),
            client_timeout_ms: 30_000,
            upstream_timeout_ms: 5_000,
        }
    }
}

impl Config {
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing config: {}", path.display()))
    }

    /// Build a `Config` from `AORTA_BIND`, `AORTA_PASSWORD`,
    /// `AORTA_CLIENT_TIMEOUT_MS`, `AORTA_UPSTREAM_TIMEOUT_MS`, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind: std::env::var("AORTA_BIND").unwrap_or(defaults.bind),
            password: std::env::var("AORTA_PASSWORD").unwrap_or(defaults.password),
            client_timeout_ms: std::env::var("AORTA_CLIENT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.client_timeout_ms),
            upstream_timeout_ms: std::env::var("AORTA_UPSTREAM_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.upstream_timeout_ms),
        }
    }
}
