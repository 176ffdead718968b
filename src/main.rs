use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use gear_queue::config::{QueueConfig, ServerConfig};
use gear_queue::gears::{Gear, GearManifest};
use gear_queue::node::Node;
use gear_queue::shutdown::install_shutdown_handler;
use gear_queue::store::StorageConfig;

#[derive(Parser, Debug)]
#[command(name = "gear-queue")]
#[command(version)]
#[command(about = "Job queue and batch orchestration for gear runs")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the queue server
    Serve(ServeArgs),

    /// Gear manifest commands
    Gear {
        #[command(subcommand)]
        command: GearCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Address to listen on for HTTP
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// SQLite database file. Jobs are kept in memory when omitted.
    #[arg(long)]
    db: Option<PathBuf>,

    /// JSON seed file with gears, containers, grants and operators
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Highest attempt number a retry may create without force
    #[arg(long, default_value = "3")]
    max_attempts: u32,

    /// Seconds a running job may go without finishing before it is reclaimed
    #[arg(long, default_value = "100")]
    orphan_timeout_secs: u64,

    /// Seconds between orphan scans
    #[arg(long, default_value = "30")]
    reap_interval_secs: u64,
}

impl ServeArgs {
    fn into_config(self) -> ServerConfig {
        let storage = match self.db {
            Some(path) => StorageConfig::Sqlite(path),
            None => StorageConfig::Memory,
        };
        ServerConfig {
            listen_addr: self.listen,
            storage,
            queue: QueueConfig {
                max_attempts: self.max_attempts,
                orphan_timeout: Duration::from_secs(self.orphan_timeout_secs),
                reap_interval: Duration::from_secs(self.reap_interval_secs),
            },
            seed_path: self.seed,
        }
    }
}

// =============================================================================
// Gear Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum GearCommands {
    /// Check a gear manifest and print its invocation schema
    Validate {
        /// Path to the manifest JSON file
        manifest: PathBuf,
    },
}

async fn run_server(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = args.into_config();
    tracing::info!(
        addr = %config.listen_addr,
        storage = ?config.storage,
        max_attempts = config.queue.max_attempts,
        "Starting gear-queue"
    );

    let node = Node::new(config)?;
    let shutdown = install_shutdown_handler()?;
    node.run(shutdown).await
}

fn validate_manifest(path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let manifest: GearManifest = serde_json::from_str(&raw)?;
    let gear = Gear::compile(manifest)?;
    println!("{}", serde_json::to_string_pretty(&gear.invocation_schema())?);
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => {
            run_server(serve_args).await?;
        }
        Commands::Gear { command } => match command {
            GearCommands::Validate { manifest } => {
                validate_manifest(&manifest)?;
            }
        },
    }

    Ok(())
}
