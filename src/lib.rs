pub mod board;
pub mod connection;
pub mod heartbeat;
pub mod limiter;
pub mod matchmaker;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod server;

use std::time::Duration;

/// Server tuning, passed into `server::serve` at construction.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// A connection with no PING for this long is considered dead.
    pub heartbeat_timeout: Duration,
    /// How often the heartbeat monitor scans the active set.
    pub sweep_interval: Duration,
    pub max_connections: usize,
    pub max_per_ip: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(25),
            sweep_interval: Duration::from_secs(5),
            max_connections: 1000,
            max_per_ip: 5,
        }
    }
}
