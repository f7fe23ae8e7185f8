//! Command-line front end for the Hublink scanner
//!
//! Scans for Hublink nodes, reads their status and sends commands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use serde::Serialize;

use hublink_scanner::commands;
use hublink_scanner::config::{AppConfig, CONFIG_FILE_NAME};
use hublink_scanner::logging;
use hublink_scanner::state::AppState;
use hublink_scanner::utils::normalize_address;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "hublink-scanner")]
#[command(about = "Discover and talk to Hublink BLE nodes")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,
    /// Use the simulated radio
    #[arg(long)]
    simulate: bool,
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for Hublink devices
    Scan {
        /// Name substring to match
        #[arg(short, long)]
        filter: Option<String>,
        /// Scan duration in seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Connect to a device, print its status and disconnect
    Probe {
        /// Device address
        address: String,
    },
    /// Send a command to a device
    Send {
        /// Device address
        address: String,
        /// Name of a command from the command file
        command: String,
        /// Treat COMMAND as a raw payload instead of a command name
        #[arg(long)]
        raw: bool,
    },
    /// List the loaded commands
    Commands,
    /// Print the scanner status
    Status,
    /// Print the effective configuration
    Config {
        /// Also write it to the configuration file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    let mut config = AppConfig::load_config(&cli.config).await?;
    config.simulation |= cli.simulate;
    let state = AppState::new(config).await?;

    let outcome = run(&state, cli.command, &cli.config).await;
    state.shutdown().await;
    outcome
}

async fn run(state: &AppState, command: Commands, config_path: &Path) -> Result<()> {
    match command {
        Commands::Scan { filter, duration } => {
            let duration = duration.map(Duration::from_secs);
            let session = state
                .bluetooth_manager
                .start_scan(filter.as_deref(), duration)
                .await?;
            info!("Scanning for devices matching '{}'", session.name_filter);
            wait_for_scan_end(state).await;
            print_json(&commands::list_devices(state))?;
        }
        Commands::Probe { address } => {
            discover(state, &address).await?;
            print_json(&commands::connect_to_device(state, &address).await)?;
            print_json(&commands::disconnect(state, &address).await)?;
        }
        Commands::Send {
            address,
            command,
            raw,
        } => {
            discover(state, &address).await?;
            let connected = commands::connect_to_device(state, &address).await;
            if !connected.success {
                print_json(&connected)?;
                bail!("could not connect to {}", address);
            }
            let sent = if raw {
                commands::send_raw_command(state, &address, &command).await
            } else {
                commands::send_named_command(state, &address, &command).await
            };
            print_json(&sent)?;
            print_json(&commands::disconnect(state, &address).await)?;
        }
        Commands::Commands => {
            print_json(&commands::get_command_file_status(state).await)?;
        }
        Commands::Status => {
            print_json(&commands::get_scanner_status(state))?;
        }
        Commands::Config { save } => {
            print_json(&state.config)?;
            if save {
                state.config.save_config(config_path).await?;
            }
        }
    }
    Ok(())
}

/// Scans until `address` shows up or the scan ends.
async fn discover(state: &AppState, address: &str) -> Result<()> {
    let manager = &state.bluetooth_manager;
    let address = normalize_address(address);
    manager.start_scan(None, None).await?;
    while manager.scanner_status().is_scanning {
        if manager.device(&address).is_ok() {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    if manager.device(&address).is_err() {
        bail!("device {} was not found", address);
    }
    Ok(())
}

async fn wait_for_scan_end(state: &AppState) {
    while state.bluetooth_manager.scanner_status().is_scanning {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
