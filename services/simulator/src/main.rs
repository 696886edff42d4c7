use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use simulator::{Simulator, SimulatorConfig};

#[derive(Parser, Debug)]
#[command(name = "origin-sim", version, about = "Origin smart telescope simulator")]
struct Cli {
    /// TCP port serving both HTTP and WebSocket traffic
    #[arg(short, long, default_value_t = 80)]
    port: u16,

    /// Directory holding preview and astrophotography images
    #[arg(long, default_value = "simulator_data")]
    data_dir: PathBuf,

    /// Identity number advertised in the discovery beacon
    #[arg(long, default_value_t = 140020)]
    broadcast_id: u32,

    /// UDP port for the discovery beacon
    #[arg(long, default_value_t = 55555)]
    broadcast_port: u16,

    /// Disable the UDP discovery beacon
    #[arg(long)]
    no_discovery: bool,

    /// Percent chance per tick that a simulated initialization fails
    #[arg(long, default_value_t = 10)]
    init_failure_percent: u8,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "origin simulator starting");

    let cfg = SimulatorConfig {
        port: cli.port,
        data_dir: cli.data_dir,
        broadcast_id: cli.broadcast_id,
        broadcast_port: cli.broadcast_port,
        enable_discovery: !cli.no_discovery,
        init_failure_percent: cli.init_failure_percent,
        ..SimulatorConfig::default()
    };

    let simulator = Simulator::start(cfg).await?;
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    simulator.shutdown().await;
    Ok(())
}
