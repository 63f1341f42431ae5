mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cloudmirror_cloud::{ResourceType, Vendor};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cloudmirror")]
#[command(about = "Mirror multi-cloud resource inventories into a local store", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror resources of an account into the local store
    Sync {
        /// Cloud vendor (tcloud, aws, huawei, gcp, azure)
        #[arg(long)]
        vendor: Vendor,
        /// Account, project or subscription ID
        #[arg(long)]
        account: String,
        /// Regions to sync (repeatable; defaults to every region in the inventory)
        #[arg(long = "region")]
        regions: Vec<String>,
        /// Resource types to sync (repeatable; defaults to all, in dependency order)
        #[arg(long = "type")]
        resource_types: Vec<ResourceType>,
        /// Inventory snapshot directory
        #[arg(long, env = "CLOUDMIRROR_INVENTORY")]
        inventory: PathBuf,
        /// Directory holding .cloudmirror/state.json
        #[arg(long, env = "CLOUDMIRROR_STATE", default_value = ".")]
        state: PathBuf,
    },
    /// Show sync statuses recorded in the local store
    Status {
        #[arg(long)]
        vendor: Vendor,
        #[arg(long)]
        account: String,
        /// Only show this resource type
        #[arg(long = "type")]
        resource_type: Option<ResourceType>,
        /// Directory holding .cloudmirror/state.json
        #[arg(long, env = "CLOUDMIRROR_STATE", default_value = ".")]
        state: PathBuf,
    },
    /// Verify that the inventory holds the account
    CheckAuth {
        #[arg(long)]
        vendor: Vendor,
        #[arg(long)]
        account: String,
        /// Inventory snapshot directory
        #[arg(long, env = "CLOUDMIRROR_INVENTORY")]
        inventory: PathBuf,
    },
    /// Poll resources until they reach a state
    Wait {
        #[arg(long)]
        vendor: Vendor,
        #[arg(long)]
        account: String,
        #[arg(long)]
        region: String,
        #[arg(long = "type")]
        resource_type: ResourceType,
        /// Cloud IDs to wait for (repeatable)
        #[arg(long = "id", required = true)]
        ids: Vec<String>,
        /// States counted as success (repeatable)
        #[arg(long = "success", required = true)]
        success: Vec<String>,
        /// States counted as failure (repeatable)
        #[arg(long = "failed")]
        failed: Vec<String>,
        /// Inventory snapshot directory
        #[arg(long, env = "CLOUDMIRROR_INVENTORY")]
        inventory: PathBuf,
        /// Seconds between polls (defaults to the config value)
        #[arg(long)]
        interval: Option<u64>,
        /// Seconds before giving up (defaults to the config value)
        #[arg(long)]
        timeout: Option<u64>,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cloudmirror_config::load().context("Failed to load config")?;

    match cli.command {
        Commands::Sync {
            vendor,
            account,
            regions,
            resource_types,
            inventory,
            state,
        } => {
            let args = commands::sync::SyncArgs {
                vendor,
                account,
                regions,
                resource_types,
                inventory,
                state,
            };
            commands::sync::handle(&config, args).await?;
        }
        Commands::Status {
            vendor,
            account,
            resource_type,
            state,
        } => {
            commands::status::handle(vendor, &account, resource_type, &state).await?;
        }
        Commands::CheckAuth {
            vendor,
            account,
            inventory,
        } => {
            commands::check_auth::handle(vendor, &account, &inventory).await?;
        }
        Commands::Wait {
            vendor,
            account,
            region,
            resource_type,
            ids,
            success,
            failed,
            inventory,
            interval,
            timeout,
        } => {
            let args = commands::wait::WaitArgs {
                vendor,
                account,
                region,
                resource_type,
                ids,
                success,
                failed,
                inventory,
                interval,
                timeout,
            };
            commands::wait::handle(&config, args).await?;
        }
    }

    Ok(())
}
