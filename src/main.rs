//! Motion sensor node - main entry point

use clap::{Parser, Subcommand};
use motion_node::config::NodeConfig;
use motion_node::connectivity::HostLink;
use motion_node::observability::init_default_logging;
use motion_node::sensor::SysfsInput;
use motion_node::time::MonotonicClock;
use motion_node::transport::RumqttTransport;
use motion_node::{ControlLoop, NodeResult};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATHS: &[&str] = &["motion-node.toml", "config/motion-node.toml"];

/// Motion sensor node publishing to MQTT
#[derive(Parser)]
#[command(name = "motion-node")]
#[command(about = "Debounced motion detection published over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MOTION_NODE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Print the parsed configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting motion-node v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    report_placeholders(&config);

    let result = match cli.command {
        Commands::Run => run_node(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(config_path: Option<&Path>) -> NodeResult<NodeConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(NodeConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = Path::new(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(NodeConfig::load_from_file(path)?);
        }
    }

    error!("No configuration file found. Provide one with -c/--config or create motion-node.toml");
    process::exit(1);
}

/// Placeholder credentials leave the node running but unable to connect
fn report_placeholders(config: &NodeConfig) {
    for field in config.placeholder_fields() {
        error!(
            "Configuration field {} still holds a placeholder value; the node will not be able to connect",
            field
        );
    }
}

async fn run_node(config: NodeConfig) -> NodeResult<()> {
    let identity = config.identity()?;
    info!(
        "Sensor {} publishing to {}",
        identity.sensor_id(),
        identity.motion_topic()
    );

    let transport =
        RumqttTransport::from_config(&config.client_id(), &identity.status_topic(), &config.mqtt)?;
    let clock = Arc::new(MonotonicClock::new());
    let mut node = ControlLoop::new(&config, HostLink::new(), transport, clock)?;

    let input = config.require_input()?;
    info!("Polling motion input at {}", input.value_path.display());
    node = node.with_input(Box::new(SysfsInput::new(&input.value_path)));

    node.run_until(shutdown_signal()).await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = signal::ctrl_c() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Received Ctrl+C, shutting down gracefully...");
    }
}

fn handle_config_command(config: &NodeConfig, show: bool) -> NodeResult<()> {
    if show {
        let rendered = toml::to_string_pretty(&config.redacted())
            .map_err(|e| motion_node::NodeError::internal(e.to_string()))?;
        println!("Current configuration:");
        println!("{rendered}");
    }

    info!("Configuration validation complete");
    Ok(())
}
