//! Sensor node entry point

use clap::{Parser, Subcommand};
use sensornode::config::NodeConfig;
use sensornode::observability::logging::{parse_spans_flag, LogFormat};
use sensornode::observability::{init_default_logging, init_logging};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};

/// MQTT sensor node
#[derive(Parser)]
#[command(name = "sensornode")]
#[command(about = "MQTT telemetry node with command handling")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace); overrides LOG_LEVEL
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring up the link, connect and run the telemetry schedule
    Run,
    /// Validate configuration
    Config {
        /// Show the effective configuration, defaults included
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_cli_logging(cli.verbose);

    info!("Starting sensor node v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => sensornode::run_node(config)
            .await
            .map_err(|e| -> Box<dyn std::error::Error> { Box::new(e) }),
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn init_cli_logging(verbose: u8) {
    let level = match verbose {
        0 => return init_default_logging(),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default());
    let include_spans = parse_spans_flag(&std::env::var("LOG_SPANS").unwrap_or_default());
    init_logging(level, format, include_spans);
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<NodeConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(NodeConfig::load_from_file(path)?);
    }

    for path_str in ["sensornode.toml", "config/sensornode.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(NodeConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create sensornode.toml".into())
}

fn handle_config_command(config: &NodeConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!(device_id = %config.device.id, "Configuration validation complete");
    Ok(())
}
