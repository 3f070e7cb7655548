//! Bucket policy commands

use std::path::PathBuf;

use clap::Subcommand;
use serde::Serialize;

use super::get_client;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};
use bk_core::{
    BucketAdminService as _, RemotePath, apply_public_read_policy, parse_bucket_path,
    public_read_policy, validate_policy,
};

#[derive(Subcommand, Debug)]
pub enum PolicyCommands {
    /// Show the policy attached to a bucket
    Get(GetArgs),

    /// Attach a policy document read from a file
    Set(SetArgs),

    /// Allow anonymous reads of every object in a bucket
    PublicRead(PublicReadArgs),
}

#[derive(clap::Args, Debug)]
pub struct GetArgs {
    /// Bucket path (alias/bucket)
    pub path: String,
}

#[derive(clap::Args, Debug)]
pub struct SetArgs {
    /// Bucket path (alias/bucket)
    pub path: String,

    /// JSON policy document
    pub file: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct PublicReadArgs {
    /// Bucket path (alias/bucket)
    pub path: String,

    /// Print the policy without applying it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Serialize)]
struct PolicyOutput {
    bucket: String,
    policy: Option<serde_json::Value>,
    applied: bool,
}

pub async fn execute(cmd: PolicyCommands, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    match cmd {
        PolicyCommands::Get(args) => execute_get(args, &formatter).await,
        PolicyCommands::Set(args) => execute_set(args, &formatter).await,
        PolicyCommands::PublicRead(args) => execute_public_read(args, &formatter).await,
    }
}

fn parse_target(path: &str, formatter: &Formatter) -> Result<RemotePath, ExitCode> {
    parse_bucket_path(path).map_err(|e| {
        formatter.error(&e.to_string());
        ExitCode::UsageError
    })
}

fn print_policy(formatter: &Formatter, target: &RemotePath, policy: Option<&str>, applied: bool) {
    let parsed = policy.map(|p| {
        serde_json::from_str::<serde_json::Value>(p)
            .unwrap_or_else(|_| serde_json::Value::String(p.to_string()))
    });

    if formatter.is_json() {
        formatter.json(&PolicyOutput {
            bucket: target.to_string(),
            policy: parsed,
            applied,
        });
        return;
    }

    match parsed {
        Some(value) => {
            let pretty = serde_json::to_string_pretty(&value).unwrap_or_default();
            formatter.println(&pretty);
        }
        None => formatter.println(&format!("Bucket '{}' has no policy.", target.bucket)),
    }
}

async fn execute_get(args: GetArgs, formatter: &Formatter) -> ExitCode {
    let target = match parse_target(&args.path, formatter) {
        Ok(t) => t,
        Err(code) => return code,
    };
    let client = match get_client(&target.alias, formatter).await {
        Ok(c) => c,
        Err(code) => return code,
    };

    match client.get_bucket_policy(&target.bucket).await {
        Ok(policy) => {
            print_policy(formatter, &target, policy.as_deref(), true);
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("Failed to get bucket policy: {e}"));
            ExitCode::from_error(&e)
        }
    }
}

async fn execute_set(args: SetArgs, formatter: &Formatter) -> ExitCode {
    let target = match parse_target(&args.path, formatter) {
        Ok(t) => t,
        Err(code) => return code,
    };

    let policy = match tokio::fs::read_to_string(&args.file).await {
        Ok(p) => p,
        Err(e) => {
            formatter.error(&format!("Failed to read {}: {e}", args.file.display()));
            return ExitCode::UsageError;
        }
    };
    if let Err(e) = validate_policy(&policy) {
        formatter.error(&e.to_string());
        return ExitCode::UsageError;
    }

    let client = match get_client(&target.alias, formatter).await {
        Ok(c) => c,
        Err(code) => return code,
    };

    match client.put_bucket_policy(&target.bucket, &policy).await {
        Ok(()) => {
            if formatter.is_json() {
                print_policy(formatter, &target, Some(&policy), true);
            } else {
                let styled = formatter.style_name(&target.to_string());
                formatter.success(&format!("Policy attached to '{styled}'."));
            }
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("Failed to set bucket policy: {e}"));
            ExitCode::from_error(&e)
        }
    }
}

async fn execute_public_read(args: PublicReadArgs, formatter: &Formatter) -> ExitCode {
    let target = match parse_target(&args.path, formatter) {
        Ok(t) => t,
        Err(code) => return code,
    };

    if args.dry_run {
        return match public_read_policy(&target.bucket) {
            Ok(policy) => {
                print_policy(formatter, &target, Some(&policy), false);
                ExitCode::Success
            }
            Err(e) => {
                formatter.error(&e.to_string());
                ExitCode::GeneralError
            }
        };
    }

    let client = match get_client(&target.alias, formatter).await {
        Ok(c) => c,
        Err(code) => return code,
    };

    match apply_public_read_policy(client.as_ref(), &target.bucket).await {
        Ok(policy) => {
            if formatter.is_json() {
                print_policy(formatter, &target, Some(&policy), true);
            } else {
                let styled = formatter.style_name(&target.to_string());
                formatter.success(&format!("Objects in '{styled}' are now publicly readable."));
            }
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("Failed to apply public read policy: {e}"));
            ExitCode::from_error(&e)
        }
    }
}
