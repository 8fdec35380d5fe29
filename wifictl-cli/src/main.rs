/*!
 * wifictl
 * Command-line client for the wifictl daemon
 */

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use wifictl_daemon::ipc::{send_request, Request, Response};
use wifictl_daemon::SecurityType;

#[derive(Parser)]
#[command(name = "wifictl")]
#[command(about = "Control Wi-Fi through wifictld")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Daemon socket path
    #[arg(short, long, default_value = "/run/wifictl/wifictl.sock")]
    socket: String,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for networks and print them
    Scan,
    /// Connect to a network
    Connect {
        ssid: String,
        /// Pre-shared key; without one the network is treated as open
        #[arg(short, long)]
        psk: Option<String>,
        /// Security type, by name (wpa2-psk, sae, ...) or code
        #[arg(long, default_value = "wpa2-psk")]
        security: SecurityType,
        /// Return once the request is issued instead of waiting for the result
        #[arg(long)]
        no_wait: bool,
    },
    /// Disconnect from the current network
    Disconnect,
    /// Wait for a pending connect to settle
    WaitConnect,
    /// Wait for a DHCP lease
    WaitDhcp,
    /// Show link status
    Status,
    /// Connect with the last saved credentials
    Reconnect,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            .with_env_filter("wifictl=debug,wifictl_daemon=debug")
            .init();
    }

    let request = match cli.command {
        Commands::Scan => Request::Scan,
        Commands::Connect {
            ssid,
            psk,
            security,
            no_wait,
        } => Request::Connect {
            ssid,
            psk,
            security,
            wait: !no_wait,
        },
        Commands::Disconnect => Request::Disconnect,
        Commands::WaitConnect => Request::WaitConnect,
        Commands::WaitDhcp => Request::WaitDhcp,
        Commands::Status => Request::Status,
        Commands::Reconnect => Request::ReconnectSaved,
    };

    tracing::debug!("Sending {:?}", request);
    match send_request(&cli.socket, &request).await? {
        Response::ScanResults { networks } => {
            for network in &networks {
                println!("{}", network);
            }
            println!("{} networks found", networks.len());
        }
        Response::Success { message } => println!("{}", message),
        Response::Status { status } => {
            println!("{}", status);
        }
        Response::Error { code, message } => bail!("{} ({})", message, code),
    }

    Ok(())
}
