//! Bucket lifecycle commands

use clap::Subcommand;
use serde::Serialize;

use super::get_client;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};
use bk_core::{LifecycleRule, apply_expiration, parse_bucket_path};

#[derive(Subcommand, Debug)]
pub enum LifecycleCommands {
    /// Delete objects a number of days after they were created
    Expire(ExpireArgs),
}

#[derive(clap::Args, Debug)]
pub struct ExpireArgs {
    /// Bucket path (alias/bucket)
    pub path: String,

    /// Days after creation before an object is deleted
    #[arg(long)]
    pub days: u32,

    /// Only expire objects under this prefix
    #[arg(long)]
    pub prefix: Option<String>,
}

#[derive(Serialize)]
struct ExpireOutput {
    bucket: String,
    rule: LifecycleRule,
}

pub async fn execute(cmd: LifecycleCommands, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    match cmd {
        LifecycleCommands::Expire(args) => execute_expire(args, &formatter).await,
    }
}

async fn execute_expire(args: ExpireArgs, formatter: &Formatter) -> ExitCode {
    let target = match parse_bucket_path(&args.path) {
        Ok(t) => t,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };
    if args.days == 0 {
        formatter.error("--days must be at least 1");
        return ExitCode::UsageError;
    }

    let client = match get_client(&target.alias, formatter).await {
        Ok(c) => c,
        Err(code) => return code,
    };

    match apply_expiration(
        client.as_ref(),
        &target.bucket,
        args.days,
        args.prefix.as_deref(),
    )
    .await
    {
        Ok(rule) => {
            if formatter.is_json() {
                formatter.json(&ExpireOutput {
                    bucket: target.to_string(),
                    rule,
                });
            } else {
                let styled = formatter.style_name(&target.to_string());
                let scope = if rule.prefix.is_empty() {
                    String::new()
                } else {
                    format!(" under '{}'", rule.prefix)
                };
                formatter.success(&format!(
                    "Objects in '{styled}'{scope} expire {} day(s) after creation.",
                    rule.expiration_days
                ));
            }
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("Failed to configure lifecycle: {e}"));
            ExitCode::from_error(&e)
        }
    }
}
