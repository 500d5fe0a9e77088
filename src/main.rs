//! ble2mqtt - entry point
//!
//! Boot sequence: logging, configuration, network bring-up, then the
//! supervisor runs until SIGINT or SIGTERM. Configuration and network failures
//! end the process with a non-zero status; link failures never do.

use ble2mqtt::config::BridgeConfig;
use ble2mqtt::error::BridgeResult;
use ble2mqtt::network;
use ble2mqtt::observability::{init_default_logging, init_logging, LogFormat};
use ble2mqtt::supervisor::Supervisor;
use ble2mqtt::transport::mqtt::RumqttBroker;
use ble2mqtt::transport::WirelessTransport;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "ble2mqtt")]
#[command(about = "Bridge a BLE peripheral to an MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace); ignored when LOG_LEVEL is set
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge
    Run,
    /// Validate the configuration
    Config {
        /// Print the resolved configuration and derived topics
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_observability(cli.verbose);

    info!("Starting ble2mqtt v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_bridge(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!(boot_fatal = e.is_boot_fatal(), "Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn init_observability(verbose: u8) {
    if verbose == 0 || std::env::var("LOG_LEVEL").is_ok() {
        init_default_logging();
        return;
    }
    let level = if verbose == 1 { Level::DEBUG } else { Level::TRACE };
    let format = std::env::var("LOG_FORMAT")
        .map(|f| LogFormat::parse(&f))
        .unwrap_or(LogFormat::Compact);
    init_logging(level, format, false);
}

fn load_configuration(config_path: &Option<PathBuf>) -> BridgeResult<BridgeConfig> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(BridgeConfig::load_from_file(path)?)
        }
        None => {
            let (path, config) = BridgeConfig::load_default()?;
            info!("Loading configuration from: {}", path.display());
            Ok(config)
        }
    }
}

async fn run_bridge(config: BridgeConfig) -> BridgeResult<()> {
    network::bring_up(
        &config.network.hostname,
        &config.network.interface,
        config.network_timeout(),
    )
    .await?;

    #[cfg(feature = "ble")]
    {
        let central = ble2mqtt::transport::ble::BtleplugCentral::new().await?;
        serve(config, central).await
    }

    #[cfg(not(feature = "ble"))]
    {
        let _ = config;
        Err(ble2mqtt::BridgeError::unsupported(
            "built without BLE support; rebuild with --features ble",
        ))
    }
}

#[cfg_attr(not(feature = "ble"), allow(dead_code))]
async fn serve<W: WirelessTransport>(config: BridgeConfig, central: W) -> BridgeResult<()> {
    let supervisor = Supervisor::from_config(&config, central, RumqttBroker::new())?;
    info!(
        device = %config.ble.serial_number,
        broker = %config.mqtt.broker_url,
        "Bridge configured"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
        let _ = shutdown_tx.send(true);
    });

    supervisor.run(shutdown_rx).await;
    Ok(())
}

fn handle_config_command(config: &BridgeConfig, show: bool) -> BridgeResult<()> {
    if show {
        let topics = config.topics()?;
        let rendered = toml::to_string_pretty(&config.redacted())?;
        println!("{rendered}");
        println!("# control:       {}", topics.control_topic());
        println!("# notifications: {}/<name>", topics.device_topic());
        println!("# liveness:      {}/state/{{mqtt,ble}}", topics.device_topic());
    }

    info!("Configuration validation complete");
    Ok(())
}
