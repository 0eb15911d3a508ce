//! gpurm CLI
//!
//! Command-line interface for querying and allocating GPUs through the gpurm
//! daemon.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

/// gpurm - GPU resource manager client
#[derive(Parser, Debug)]
#[command(name = "gpurm")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon API address
    #[arg(long, default_value = "http://localhost:9090", global = true)]
    api: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show GPU telemetry
    Gpus {
        /// Only show this device
        #[arg(long)]
        device: Option<u32>,
    },

    /// Show host memory usage
    Memory,

    /// Clear cached GPU memory
    Cleanup {
        /// Only clean this device (all devices if not provided)
        #[arg(long)]
        device: Option<u32>,
    },

    /// Reserve the best GPU for a task
    Allocate {
        /// Required free memory in MB (daemon default if not provided)
        #[arg(long)]
        memory: Option<u64>,
    },

    /// Release an allocation
    Release {
        /// Allocation ID
        id: Uuid,
    },

    /// List active allocations
    Leases,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let client = commands::ApiClient::new(&cli.api);

    match cli.command {
        Commands::Gpus { device } => {
            commands::gpus(&client, device).await?;
        }
        Commands::Memory => {
            commands::memory(&client).await?;
        }
        Commands::Cleanup { device } => {
            commands::cleanup(&client, device).await?;
        }
        Commands::Allocate { memory } => {
            commands::allocate(&client, memory).await?;
        }
        Commands::Release { id } => {
            commands::release(&client, id).await?;
        }
        Commands::Leases => {
            commands::leases(&client).await?;
        }
    }

    Ok(())
}
