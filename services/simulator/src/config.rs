//! Simulator configuration.
//!
//! Defaults match the real device: port 80, discovery beacon on UDP 55555
//! every 5 s, heartbeat ping every 5 s with a 15 s pong timeout.  All timing
//! knobs are plain fields so integration tests can compress time.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// TCP port carrying both HTTP and WebSocket traffic.
    pub port: u16,
    /// Root directory of the on-disk image store.
    pub data_dir: PathBuf,
    /// Identity number advertised by the discovery beacon.
    pub broadcast_id: u32,
    /// UDP port the discovery beacon targets.
    pub broadcast_port: u16,
    pub broadcast_interval: Duration,
    pub enable_discovery: bool,
    /// Interval between server-initiated pings.
    pub heartbeat_interval: Duration,
    /// How long to wait for a pong before counting a miss.
    pub pong_timeout: Duration,
    /// Percent chance per tick that a running initialization fails.
    pub init_failure_percent: u8,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            port: 80,
            data_dir: PathBuf::from("simulator_data"),
            broadcast_id: 140020,
            broadcast_port: 55555,
            broadcast_interval: Duration::from_secs(5),
            enable_discovery: true,
            heartbeat_interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(15),
            init_failure_percent: 10,
        }
    }
}
