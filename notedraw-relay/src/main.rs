//! Standalone relay server for shared drawings.
//!
//! Configure with `NOTEDRAW_RELAY_ADDR`, `NOTEDRAW_RELAY_MAX_PEERS` and
//! `NOTEDRAW_RELAY_BROADCAST_CAPACITY`; set `RUST_LOG` for verbosity.

use log::{error, info};
use notedraw_collab::{RelayServer, ServerConfig};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = ServerConfig::from_env();
    info!(
        "Starting notedraw relay on {} (max {} members per drawing)",
        config.bind_addr, config.max_peers_per_room
    );

    let server = RelayServer::new(config);
    if let Err(e) = server.run().await {
        error!("Relay server stopped: {e}");
        std::process::exit(1);
    }
}
