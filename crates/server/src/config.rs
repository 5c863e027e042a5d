use std::time::Duration;

use riptide::net::protocol::{DEFAULT_LOBBY_PORT, DEFAULT_TICK_RATE};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub lobby_port: u16,
    pub game_base_port: u16,
    pub max_instances: u32,
    pub room_capacity: u8,
    pub tick_rate: u32,
    pub snapshot_rate: u32,
    pub client_timeout: Duration,
    pub cleanup_interval: Duration,
    pub accounts_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            lobby_port: DEFAULT_LOBBY_PORT,
            game_base_port: DEFAULT_LOBBY_PORT,
            max_instances: 16,
            room_capacity: 4,
            tick_rate: DEFAULT_TICK_RATE,
            snapshot_rate: DEFAULT_TICK_RATE,
            client_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(5),
            accounts_path: "data/accounts.json".into(),
        }
    }
}
