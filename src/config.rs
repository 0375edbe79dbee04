//! Plain configuration structs for the client and server. Argument parsing
//! into these lives in the binaries (`src/main.rs`, `src/bin/client.rs`),
//! not here — this module only describes the shape.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Whether a duplicate `request_id` re-executes the operation (at-least-once)
/// or replays the stored reply without re-executing it (at-most-once).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationSemantics {
    AtLeastOnce,
    AtMostOnce,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_port: u16,
    pub server_addr: SocketAddr,
    pub cache_dir: PathBuf,
    pub freshness_interval: Duration,
    pub max_attempts: u32,
    pub per_attempt_timeout: Duration,
}

impl ClientConfig {
    pub fn client_ip(&self) -> Ipv4Addr {
        Ipv4Addr::LOCALHOST
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub server_root: PathBuf,
    pub invocation_semantics: InvocationSemantics,
    /// How often the receive loop wakes up to check the shutdown flag.
    pub recv_timeout: Duration,
}
