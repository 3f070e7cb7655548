//! Bucket commands: list, create, delete, exists

use clap::Subcommand;
use serde::Serialize;

use super::get_client;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};
use bk_core::{BucketAdminService as _, BucketInfo, RemotePath, parse_bucket_path};

#[derive(Subcommand, Debug)]
pub enum BucketCommands {
    /// List buckets under an alias
    List(ListArgs),

    /// Create a bucket
    Create(BucketArgs),

    /// Delete an empty bucket
    Delete(BucketArgs),

    /// Check whether a bucket exists
    Exists(BucketArgs),
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Alias name
    pub alias: String,
}

#[derive(clap::Args, Debug)]
pub struct BucketArgs {
    /// Bucket path (alias/bucket)
    pub path: String,
}

#[derive(Serialize)]
struct BucketListOutput {
    alias: String,
    buckets: Vec<BucketInfo>,
}

#[derive(Serialize)]
struct BucketOperationOutput {
    success: bool,
    bucket: String,
    message: String,
}

#[derive(Serialize)]
struct BucketExistsOutput {
    bucket: String,
    exists: bool,
}

pub async fn execute(cmd: BucketCommands, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    match cmd {
        BucketCommands::List(args) => execute_list(args, &formatter).await,
        BucketCommands::Create(args) => execute_create(args, &formatter).await,
        BucketCommands::Delete(args) => execute_delete(args, &formatter).await,
        BucketCommands::Exists(args) => execute_exists(args, &formatter).await,
    }
}

fn parse_target(path: &str, formatter: &Formatter) -> Result<RemotePath, ExitCode> {
    parse_bucket_path(path).map_err(|e| {
        formatter.error(&e.to_string());
        ExitCode::UsageError
    })
}

async fn execute_list(args: ListArgs, formatter: &Formatter) -> ExitCode {
    let client = match get_client(&args.alias, formatter).await {
        Ok(c) => c,
        Err(code) => return code,
    };

    let buckets = match client.list_buckets().await {
        Ok(b) => b,
        Err(e) => {
            formatter.error(&format!("Failed to list buckets: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    if formatter.is_json() {
        formatter.json(&BucketListOutput {
            alias: args.alias,
            buckets,
        });
    } else if buckets.is_empty() {
        formatter.println("No buckets found.");
    } else {
        let mut table = formatter.table(&["Bucket", "Created"]);
        for bucket in &buckets {
            let created = bucket
                .created
                .map(|ts| ts.strftime("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            table.add_row(vec![
                formatter.style_name(&bucket.name),
                formatter.style_date(&created),
            ]);
        }
        formatter.println(&table.to_string());
    }

    ExitCode::Success
}

async fn execute_create(args: BucketArgs, formatter: &Formatter) -> ExitCode {
    let target = match parse_target(&args.path, formatter) {
        Ok(t) => t,
        Err(code) => return code,
    };
    let client = match get_client(&target.alias, formatter).await {
        Ok(c) => c,
        Err(code) => return code,
    };

    match client.bucket_exists(&target.bucket).await {
        Ok(true) => {
            formatter.error(&format!("Bucket '{}' already exists", target.bucket));
            return ExitCode::Conflict;
        }
        Ok(false) => {}
        Err(e) => {
            formatter.error(&format!("Failed to check bucket: {e}"));
            return ExitCode::from_error(&e);
        }
    }

    match client.create_bucket(&target.bucket).await {
        Ok(()) => {
            report_operation(formatter, &target, "created");
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("Failed to create bucket: {e}"));
            ExitCode::from_error(&e)
        }
    }
}

async fn execute_delete(args: BucketArgs, formatter: &Formatter) -> ExitCode {
    let target = match parse_target(&args.path, formatter) {
        Ok(t) => t,
        Err(code) => return code,
    };
    let client = match get_client(&target.alias, formatter).await {
        Ok(c) => c,
        Err(code) => return code,
    };

    match client.bucket_exists(&target.bucket).await {
        Ok(true) => {}
        Ok(false) => {
            formatter.error(&format!("Bucket '{}' does not exist", target.bucket));
            return ExitCode::NotFound;
        }
        Err(e) => {
            formatter.error(&format!("Failed to check bucket: {e}"));
            return ExitCode::from_error(&e);
        }
    }

    match client.delete_bucket(&target.bucket).await {
        Ok(()) => {
            report_operation(formatter, &target, "deleted");
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("Failed to delete bucket: {e}"));
            ExitCode::from_error(&e)
        }
    }
}

async fn execute_exists(args: BucketArgs, formatter: &Formatter) -> ExitCode {
    let target = match parse_target(&args.path, formatter) {
        Ok(t) => t,
        Err(code) => return code,
    };
    let client = match get_client(&target.alias, formatter).await {
        Ok(c) => c,
        Err(code) => return code,
    };

    match client.bucket_exists(&target.bucket).await {
        Ok(exists) => {
            if formatter.is_json() {
                formatter.json(&BucketExistsOutput {
                    bucket: target.to_string(),
                    exists,
                });
            } else if exists {
                formatter.println(&format!("Bucket '{}' exists", target.bucket));
            } else {
                formatter.println(&format!("Bucket '{}' does not exist", target.bucket));
            }
            if exists {
                ExitCode::Success
            } else {
                ExitCode::NotFound
            }
        }
        Err(e) => {
            formatter.error(&format!("Failed to check bucket: {e}"));
            ExitCode::from_error(&e)
        }
    }
}

fn report_operation(formatter: &Formatter, target: &RemotePath, verb: &str) {
    if formatter.is_json() {
        formatter.json(&BucketOperationOutput {
            success: true,
            bucket: target.to_string(),
            message: format!("Bucket '{}' {verb}", target.bucket),
        });
    } else {
        let styled = formatter.style_name(&target.to_string());
        formatter.success(&format!("Bucket '{styled}' {verb}."));
    }
}
