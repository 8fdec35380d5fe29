/*!
 * wifictl Daemon
 * Wi-Fi scan/connect control over the platform management bus
 */

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tracing::{info, warn};

use wifictl_daemon::config::DaemonConfig;
use wifictl_daemon::device::FileDeviceConfig;
use wifictl_daemon::ipc::{self, IpcServer, Request, Response};
use wifictl_daemon::platform::SimulatedPlatform;
use wifictl_daemon::WifiShim;

#[derive(Parser)]
#[command(name = "wifictld")]
#[command(about = "Wi-Fi control daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "/etc/wifictl/wifictld.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run,
    /// Check daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("wifictl_daemon={},wifictld={}", log_level, log_level))
        .init();

    let config = DaemonConfig::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await,
        Commands::Status => check_status(&config).await,
    }
}

async fn run_daemon(config: DaemonConfig) -> Result<()> {
    info!("wifictl daemon starting...");

    let platform = SimulatedPlatform::new(&config.simulation.interface)
        .with_networks(config.simulation.networks.clone())
        .with_latency(Duration::from_millis(config.simulation.event_latency_ms))
        .with_dhcp_base(config.simulation.dhcp_base);
    info!(
        "Using simulated radio on {} with {} networks",
        config.simulation.interface,
        config.simulation.networks.len()
    );

    let device = FileDeviceConfig::new(&config.device_config_path);
    let shim = Arc::new(WifiShim::init(
        Arc::new(platform),
        Arc::new(device),
        config.wifi_options(),
    )?);

    if config.wifi.auto_connect {
        match shim.reconnect_saved() {
            Ok(()) => info!("Auto-connect requested"),
            Err(e) => info!("No auto-connect: {}", e),
        }
    }

    // A stale socket from a previous run blocks bind.
    let socket_path = Path::new(&config.socket_path);
    if socket_path.exists() {
        warn!("Removing stale socket {}", config.socket_path);
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    let ipc_server = IpcServer::new(listener, shim, config.scan_timeout());

    info!("wifictl daemon ready on socket: {}", config.socket_path);

    ipc_server.run().await?;

    Ok(())
}

async fn check_status(config: &DaemonConfig) -> Result<()> {
    match ipc::send_request(&config.socket_path, &Request::Status).await? {
        Response::Status { status } => {
            println!("{}", status);
        }
        other => println!("Unexpected response: {:?}", other),
    }
    Ok(())
}
