//! Command-line and environment configuration.

use clap::Parser;
use inkroom_collab::ServerConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "inkroom-relay")]
#[command(about = "Room relay for the inkroom collaborative whiteboard")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "INKROOM_BIND", default_value = "127.0.0.1:3000")]
    pub bind: String,

    /// Maximum connected peers per room
    #[arg(long, env = "INKROOM_MAX_PEERS", default_value_t = 100)]
    pub max_peers: usize,

    /// Messages a slow peer may fall behind before it starts losing them
    #[arg(long, env = "INKROOM_BROADCAST_CAPACITY", default_value_t = 256)]
    pub broadcast_capacity: usize,

    /// Seconds between WebSocket pings
    #[arg(long, env = "INKROOM_HEARTBEAT_SECS", default_value_t = 25)]
    pub heartbeat_secs: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            bind_addr: args.bind,
            max_peers_per_room: args.max_peers,
            broadcast_capacity: args.broadcast_capacity,
            heartbeat_interval_secs: args.heartbeat_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_server_config() {
        let config: ServerConfig = Args::parse_from(["inkroom-relay"]).into();
        let defaults = ServerConfig::default();
        assert_eq!(config.bind_addr, defaults.bind_addr);
        assert_eq!(config.max_peers_per_room, defaults.max_peers_per_room);
        assert_eq!(config.broadcast_capacity, defaults.broadcast_capacity);
        assert_eq!(config.heartbeat_interval_secs, defaults.heartbeat_interval_secs);
    }

    #[test]
    fn test_flags_override() {
        let args = Args::parse_from([
            "inkroom-relay",
            "--bind",
            "0.0.0.0:9000",
            "--max-peers",
            "4",
            "--heartbeat-secs",
            "5",
        ]);
        let config = ServerConfig::from(args);
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.max_peers_per_room, 4);
        assert_eq!(config.heartbeat_interval_secs, 5);
    }

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
