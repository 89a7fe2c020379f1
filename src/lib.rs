//! A small RESP proxy: client authentication, a pooled upstream connection
//! per `(host, port, password)`, and a single-flight TTL read-through cache.
//! See `src/listener.rs`'s [`AortaServer`] for the public entry point.

pub mod cache;
pub mod config;
pub mod error;
pub mod keylock;
pub mod listener;
pub mod net;
pub mod pool;
pub mod resp;
pub mod session;
pub mod upstream;

pub use config::Config;
pub use listener::AortaServer;
