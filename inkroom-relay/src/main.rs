//! inkroom relay: serves whiteboard rooms over WebSocket.
//!
//! Logging is controlled with `RUST_LOG` (default `info`).

mod config;

use clap::Parser;
use inkroom_collab::{RelayServer, ServerConfig};

use config::Args;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from(Args::parse());
    log::info!(
        "Starting relay (max {} peers/room, heartbeat {}s)",
        config.max_peers_per_room,
        config.heartbeat_interval_secs
    );

    let server = RelayServer::new(config);
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Could not listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    let stats = server.stats().await;
    log::info!(
        "Served {} connections, {} draws, {} erases across {} rooms",
        stats.total_connections,
        stats.draws_relayed,
        stats.erases_relayed,
        server.store().read().await.room_count()
    );
    Ok(())
}
