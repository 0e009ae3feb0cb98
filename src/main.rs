use clap::{Parser, Subcommand};
use log::info;
use pasarela::config::{Config, ConfigError};
use pasarela::routing::probe::TcpStatusProbe;
use pasarela::routing::ClientRoutingManager;
use pasarela::session::SessionRegistry;
use pasarela::xa::XaTransactionRegistry;
use pasarela::GroupCoordinator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pasarela")]
#[command(about = "Multinode pool coordination and XA session registry for a database connection proxy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Pasarela Team")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pasarela coordinator node
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/dev.toml")]
        config: PathBuf,
    },
    /// Generate an example configuration file
    Config {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            run_pasarela(config).await?;
        }
        Commands::Config { output } => {
            generate_config(output)?;
        }
        Commands::Validate { config } => {
            validate_config(config)?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

async fn run_pasarela(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_from_file(&config_path)
        .map_err(|e| format!("Failed to load config from {:?}: {}", config_path, e))?;

    init_logging(&config)?;

    info!("Starting pasarela v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {:?}", config_path);
    info!("Cluster nodes: {:?}", config.nodes);
    info!(
        "Pool originals: max={} min_idle={}, XA limit={}",
        config.pool.max_size, config.pool.min_idle, config.xa.max_concurrent
    );

    let sessions = Arc::new(SessionRegistry::new());
    let _transactions = XaTransactionRegistry::new(sessions.clone());
    let _coordinator = GroupCoordinator::new(config.clone());

    let probe = Arc::new(TcpStatusProbe::new(Duration::from_millis(
        config.health.timeout_ms,
    )));
    let routing = Arc::new(
        ClientRoutingManager::new(
            config.nodes.clone(),
            probe,
            config.health.clone(),
            config.routing.clone(),
        )
        .with_invalidator(sessions),
    );

    info!(
        "Health probing every {}ms (timeout {}ms, threshold {})",
        config.health.interval_ms, config.health.timeout_ms, config.health.failure_threshold
    );

    // The probe loop is the only background work; session establishment
    // and XA traffic arrive through the transport layer.
    routing.start_probe_loop().await;

    Ok(())
}

fn generate_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("Generating configuration file: {:?}", output);

    Config::create_example_config(&output)
        .map_err(|e| format!("Failed to generate config: {}", e))?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  pasarela run --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Cluster nodes: {} node(s)", config.nodes.len());
            for (i, node) in config.nodes.iter().enumerate() {
                println!("    {}: {}", i + 1, node);
            }
            println!(
                "  Pool: max_size={} min_idle={}",
                config.pool.max_size, config.pool.min_idle
            );
            println!("  XA: max_concurrent={}", config.xa.max_concurrent);
            println!(
                "  Health: interval={}ms timeout={}ms threshold={}",
                config.health.interval_ms, config.health.timeout_ms, config.health.failure_threshold
            );
            println!(
                "  Routing: max_attempts={} retry_delay={}ms load_aware={}",
                config.routing.max_attempts,
                config.routing.retry_delay_ms,
                config.routing.load_aware
            );
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(Box::new(e));
        }
    }

    Ok(())
}

fn show_version() {
    println!("pasarela v{}", env!("CARGO_PKG_VERSION"));
    println!("Multinode pool coordination and XA session registry");
    println!();
    println!("Features:");
    println!("  • Piggybacked cluster-health propagation");
    println!("  • Dynamic per-node pool resizing on health changes");
    println!("  • Load-aware routing with connect-time failover");
    println!("  • XA transaction-branch registry with session reuse");
}

fn init_logging(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = match config.logging.level.as_str() {
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    info!("Logging initialized at level: {:?}", log_level);
    Ok(())
}
