use tracing::{debug, warn};

use crate::registry::Registry;
use crate::ServerConfig;

/// Liveness sweep, independent of all rooms. Each pass closes connections
/// that are already dead or whose last keep-alive is older than the timeout,
/// drops them from the active set, and reports the disconnect straight to
/// their room instead of a per-room poll.
pub async fn run(registry: Registry, config: ServerConfig) {
    let mut ticker = tokio::time::interval(config.sweep_interval);
    loop {
        ticker.tick().await;

        for conn in registry.connections().await {
            if conn.is_alive() && conn.heartbeat_age() > config.heartbeat_timeout {
                warn!(
                    "client {} ({}) timed out after {:?}",
                    conn.addr,
                    conn.id,
                    conn.heartbeat_age()
                );
                conn.mark_dead();
            }
            if conn.is_alive() {
                continue;
            }

            conn.close().await;
            registry.remove_connection(conn.id).await;
            if let Some(membership) = conn.membership().await {
                if let Some(room) = registry.room(membership.room_id).await {
                    room.handle_disconnect(&registry, membership.slot, "opponent disconnected")
                        .await;
                }
            }
        }

        let (connections, rooms) = registry.stats().await;
        debug!("sweep done: {} connections, {} rooms", connections, rooms);
    }
}
