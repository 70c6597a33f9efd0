use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use droptoken::{server, ServerConfig};

/// Authoritative four-in-a-row session server.
#[derive(Parser, Debug)]
#[command(name = "droptoken", version)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to listen on
    #[arg(long, default_value_t = 4000)]
    port: u16,
    /// Seconds without a PING before a client is dropped
    #[arg(long, default_value_t = 25)]
    heartbeat_timeout: u64,
    /// Seconds between liveness sweeps
    #[arg(long, default_value_t = 5)]
    sweep_interval: u64,
    /// Cap on concurrent connections
    #[arg(long, default_value_t = 1000)]
    max_connections: usize,
    /// Cap on concurrent connections per client IP
    #[arg(long, default_value_t = 5)]
    max_per_ip: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        heartbeat_timeout: Duration::from_secs(args.heartbeat_timeout),
        sweep_interval: Duration::from_secs(args.sweep_interval),
        max_connections: args.max_connections,
        max_per_ip: args.max_per_ip,
    };

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("droptoken server listening on {}", addr);

    server::serve(listener, config).await
}
