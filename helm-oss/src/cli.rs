//! Command-line interface of the `helm oss` plugin
//!
//! Argument parsing and dispatch to the workflows in [`crate::ops`]. Results
//! for the user go to stdout; diagnostics go through `tracing` to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;

use crate::config::StoreConfig;
use crate::deadline::Deadline;
use crate::ops::{self, OpsContext, PushOptions};
use crate::repository::HelmSettings;
use crate::storage::Storage;

/// Default deadline for one command, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Manage chart repositories stored in object storage buckets
#[derive(Parser, Debug)]
#[command(name = "oss")]
#[command(about = "Manage chart repositories stored in object storage buckets")]
#[command(
    after_help = "Basic usage:\n  helm oss init oss://bucket-name/charts\n  helm repo add mynewrepo oss://bucket-name/charts\n  helm oss push ./epicservice-0.7.2.tgz mynewrepo\n  helm oss delete epicservice --version 0.7.2 mynewrepo"
)]
pub struct Cli {
    /// Enable verbose output
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Timeout for the whole command, in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize an empty repository at URI
    Init {
        /// Repository URI, e.g. oss://bucket/charts
        uri: String,
    },
    /// Push a chart archive to the repository
    Push {
        /// Path to the chart archive
        path: PathBuf,
        /// Target repository name or oss:// URI
        repo_or_uri: String,
        /// Replace the chart if it already exists
        #[arg(long)]
        force: bool,
        /// Simulate the push without touching the repository
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete a chart version from the repository
    #[command(alias = "del")]
    Delete {
        /// Chart name
        name: String,
        /// Target repository name or oss:// URI
        repo_or_uri: String,
        /// Version of the chart to delete
        #[arg(long)]
        version: String,
    },
    /// Rebuild the repository index from the stored charts
    Reindex {
        /// Target repository name or oss:// URI
        repo_or_uri: String,
    },
    /// Helm downloader entry point; writes the object to stdout
    #[command(hide = true)]
    Download {
        cert_file: String,
        key_file: String,
        ca_file: String,
        url: String,
    },
    /// Print the plugin version
    Version,
}

fn build_context(cli: &Cli) -> Result<OpsContext> {
    let config = StoreConfig::load()?;
    let deadline = Deadline::after(Duration::from_secs(cli.timeout));
    let storage = Storage::new(Arc::new(config.open_store()), deadline);
    Ok(OpsContext::new(storage, HelmSettings::from_env()).with_verbose(cli.verbose))
}

/// Run the parsed command.
pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Version = cli.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let ctx = build_context(&cli)?;
    debug!(command = ?cli.command, timeout = cli.timeout, "Running command");

    match &cli.command {
        Commands::Init { uri } => {
            ops::init(&ctx, uri).await?;
            println!("Initialized empty repository at {uri}\n");
            println!("To add this repository to your local Helm configuration, run:\n");
            println!("  helm repo add <name> {uri}\n");
            println!("Replace <name> with your preferred repository name.");
        }
        Commands::Push {
            path,
            repo_or_uri,
            force,
            dry_run,
        } => {
            let options = PushOptions {
                force: *force,
                dry_run: *dry_run,
            };
            let outcome = ops::push(&ctx, path, repo_or_uri, options).await?;
            if outcome.dry_run {
                println!(
                    "Dry run: {} {} would be uploaded to {}.",
                    outcome.name, outcome.version, outcome.chart_url
                );
            } else {
                println!("Successfully uploaded the chart to the repository.");
            }
        }
        Commands::Delete {
            name,
            repo_or_uri,
            version,
        } => {
            ops::delete(&ctx, name, version, repo_or_uri).await?;
            println!("Successfully deleted the chart from the repository.");
        }
        Commands::Reindex { repo_or_uri } => {
            ops::reindex(&ctx, repo_or_uri).await?;
            println!("Repository {repo_or_uri} was successfully reindexed.");
        }
        Commands::Download { url, .. } => {
            let mut stdout = tokio::io::stdout();
            ops::download(&ctx, url, &mut stdout).await?;
        }
        Commands::Version => {}
    }
    Ok(())
}
