//! Command definitions and dispatch

mod alias;
mod bucket;
mod completions;
mod fetch;
mod lifecycle;
mod policy;
mod put;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};
use bk_core::{AliasManager, ConfigManager, Defaults};
use bk_s3::S3Client;

/// bucketkit - upload to and manage S3-compatible object storage
#[derive(Parser, Debug)]
#[command(name = "bk", version, about, propagate_version = true)]
pub struct Cli {
    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress everything except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable debug logging on stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage storage service aliases
    #[command(subcommand)]
    Alias(alias::AliasCommands),

    /// List, create, delete and check buckets
    #[command(subcommand)]
    Bucket(bucket::BucketCommands),

    /// Read and write bucket policies
    #[command(subcommand)]
    Policy(policy::PolicyCommands),

    /// Configure bucket lifecycle rules
    #[command(subcommand)]
    Lifecycle(lifecycle::LifecycleCommands),

    /// Upload a local file
    Put(put::PutArgs),

    /// Download a URL and upload it
    Fetch(fetch::FetchArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

/// Execute the parsed command line
pub async fn execute(cli: Cli) -> ExitCode {
    let defaults = load_defaults();
    let output_config = OutputConfig {
        json: cli.json || defaults.output == "json",
        no_color: cli.no_color,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Alias(cmd) => alias::execute(cmd, output_config).await,
        Commands::Bucket(cmd) => bucket::execute(cmd, output_config).await,
        Commands::Policy(cmd) => policy::execute(cmd, output_config).await,
        Commands::Lifecycle(cmd) => lifecycle::execute(cmd, output_config).await,
        Commands::Put(args) => put::execute(args, &defaults, output_config).await,
        Commands::Fetch(args) => fetch::execute(args, &defaults, output_config).await,
        Commands::Completions(args) => completions::execute(args),
    }
}

// A broken config file should not stop `alias set` from repairing it.
fn load_defaults() -> Defaults {
    match ConfigManager::new().and_then(|manager| manager.load()) {
        Ok(config) => config.defaults,
        Err(e) => {
            tracing::warn!(error = %e, "Using built-in defaults");
            Defaults::default()
        }
    }
}

/// Helper to get an S3Client from an alias name
pub(crate) async fn get_client(
    alias_name: &str,
    formatter: &Formatter,
) -> Result<Arc<S3Client>, ExitCode> {
    let alias_manager = match AliasManager::new() {
        Ok(am) => am,
        Err(e) => {
            formatter.error(&format!("Failed to load aliases: {e}"));
            return Err(ExitCode::GeneralError);
        }
    };

    let alias = match alias_manager.get(alias_name) {
        Ok(a) => a,
        Err(bk_core::Error::AliasNotFound(_)) => {
            formatter.error(&format!("Alias '{alias_name}' not found"));
            return Err(ExitCode::NotFound);
        }
        Err(e) => {
            formatter.error(&format!("Failed to get alias: {e}"));
            return Err(ExitCode::GeneralError);
        }
    };

    match S3Client::new(alias).await {
        Ok(client) => Ok(Arc::new(client)),
        Err(e) => {
            formatter.error(&format!("Failed to create S3 client: {e}"));
            Err(ExitCode::NetworkError)
        }
    }
}
