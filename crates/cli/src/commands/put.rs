//! put command - Upload a local file
//!
//! Small files go up in a single request, large ones as a multipart upload.
//! Expired credentials are refreshed and the upload continues within the
//! retry budget.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use super::get_client;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};
use bk_core::{
    Defaults, ObjectMetadata, PartSizePolicy, RemotePath, TransferOutcome, TransferProgress,
    TransferRequest, UploadController, parse_path,
};
use bk_s3::S3Client;

pub(crate) const CONTENT_TYPE: &str = "Content-Type";

/// Upload a local file
#[derive(Args, Debug)]
pub struct PutArgs {
    /// Local file to upload
    pub file: PathBuf,

    /// Destination (alias/bucket[/key]); a missing key or trailing '/' uses the file name
    pub target: String,

    /// Size in bytes at which the upload switches to multipart
    #[arg(long)]
    pub threshold: Option<u64>,

    /// Maximum number of parts in flight
    #[arg(short = 'P', long)]
    pub concurrency: Option<usize>,

    /// Attempts allowed when credentials expire mid-upload
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Object metadata as key=value (repeatable)
    #[arg(long = "meta", value_name = "KEY=VALUE")]
    pub meta: Vec<String>,

    /// Content type (guessed from the file extension if omitted)
    #[arg(long)]
    pub content_type: Option<String>,

    /// Only accept files with these extensions (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub allow_ext: Vec<String>,
}

#[derive(Debug, Serialize)]
struct UploadOutput {
    success: bool,
    bucket: String,
    key: String,
    size_bytes: u64,
    size_human: String,
    attempts: usize,
    url: String,
}

/// Feeds controller progress into an indicatif bar
struct UploadProgress {
    bar: ProgressBar,
}

impl TransferProgress for UploadProgress {
    fn started(&self, total_bytes: u64, parts: usize) {
        self.bar.set_length(total_bytes);
        if parts > 0 {
            self.bar.set_message(format!("{parts} parts"));
        }
    }

    fn advanced(&self, bytes: u64) {
        self.bar.inc(bytes);
    }
}

/// Execute the put command
pub async fn execute(args: PutArgs, defaults: &Defaults, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    if let Err(e) = check_extension(&args.file, &args.allow_ext) {
        formatter.error(&e);
        return ExitCode::UnsupportedFeature;
    }

    let target = match parse_path(&args.target) {
        Ok(p) => p,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };
    let Some(key) = destination_key(&target, &args.file) else {
        formatter.error(&format!(
            "Cannot derive an object key from {}",
            args.file.display()
        ));
        return ExitCode::UsageError;
    };

    let mut metadata = match parse_meta(&args.meta) {
        Ok(m) => m,
        Err(e) => {
            formatter.error(&e);
            return ExitCode::UsageError;
        }
    };
    let content_type = args
        .content_type
        .clone()
        .or_else(|| mime_guess::from_path(&args.file).first_raw().map(str::to_string));
    if let Some(ct) = content_type {
        metadata.entry(CONTENT_TYPE.to_string()).or_insert(ct);
    }

    let mut builder = TransferRequest::builder(&args.file, &target.bucket, &key)
        .defaults(defaults)
        .metadata(metadata);
    if let Some(threshold) = args.threshold {
        builder = builder.size_threshold(threshold);
    }
    if let Some(concurrency) = args.concurrency {
        builder = builder.max_concurrency(concurrency);
    }
    if let Some(retries) = args.max_retries {
        builder = builder.max_retries(retries);
    }
    let request = builder.build();

    let client = match get_client(&target.alias, &formatter).await {
        Ok(c) => c,
        Err(code) => return code,
    };

    let outcome = run_upload(&client, &request, defaults, &formatter).await;
    report_upload(&client, &request, outcome, &formatter).await
}

/// Run `request` through the upload controller with a progress bar
pub(crate) async fn run_upload(
    client: &Arc<S3Client>,
    request: &TransferRequest,
    defaults: &Defaults,
    formatter: &Formatter,
) -> TransferOutcome {
    let mut controller = UploadController::new(client.clone())
        .with_part_size_policy(PartSizePolicy::new(defaults.min_part_size));

    let bar = formatter.show_progress().then(|| {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}",
        ) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar
    });
    if let Some(bar) = &bar {
        controller = controller.with_progress(Arc::new(UploadProgress { bar: bar.clone() }));
    }

    let outcome = controller.upload_detailed(request).await;

    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    outcome
}

/// Print the result of an upload and map it to an exit code
pub(crate) async fn report_upload(
    client: &S3Client,
    request: &TransferRequest,
    outcome: TransferOutcome,
    formatter: &Formatter,
) -> ExitCode {
    let attempts = outcome.attempt_count();
    let key = match outcome.result {
        Ok(key) => key,
        Err(e) => {
            formatter.error(&format!(
                "Upload of {} failed: {e}",
                request.source_path().display()
            ));
            return ExitCode::from_transfer_error(&e);
        }
    };

    let size_bytes = tokio::fs::metadata(request.source_path())
        .await
        .map(|m| m.len())
        .unwrap_or_default();
    let size_human = humansize::format_size(size_bytes, humansize::BINARY);
    let url = client.object_url(request.bucket(), &key).await;

    if formatter.is_json() {
        formatter.json(&UploadOutput {
            success: true,
            bucket: request.bucket().to_string(),
            key,
            size_bytes,
            size_human,
            attempts,
            url,
        });
    } else {
        let styled_key = formatter.style_key(&key);
        let styled_size = formatter.style_size(&size_human);
        formatter.success(&format!(
            "Uploaded {} → {}/{styled_key} ({styled_size})",
            request.source_path().display(),
            request.bucket()
        ));
        if attempts > 1 {
            formatter.warning(&format!(
                "Credentials were refreshed {} time(s) during the upload",
                attempts - 1
            ));
        }
        formatter.println(&formatter.style_url(&url));
    }

    ExitCode::Success
}

/// Object key for `file` under `target`
fn destination_key(target: &RemotePath, file: &Path) -> Option<String> {
    if !target.key.is_empty() && !target.key.ends_with('/') {
        return Some(target.key.clone());
    }
    let name = file.file_name()?.to_str()?;
    Some(format!("{}{name}", target.key))
}

/// Parse repeated `key=value` pairs
fn parse_meta(pairs: &[String]) -> Result<ObjectMetadata, String> {
    let mut metadata = ObjectMetadata::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                metadata.insert(key.trim().to_string(), value.to_string());
            }
            _ => return Err(format!("Invalid metadata '{pair}', expected KEY=VALUE")),
        }
    }
    Ok(metadata)
}

/// Reject files whose extension is not in `allowed` (empty allows everything)
fn check_extension(file: &Path, allowed: &[String]) -> Result<(), String> {
    if allowed.is_empty() {
        return Ok(());
    }

    let ext = file
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let permitted = allowed
        .iter()
        .any(|a| a.trim().trim_start_matches('.').eq_ignore_ascii_case(&ext));

    if permitted && !ext.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "File type '{ext}' is not allowed (allowed: {})",
            allowed.join(", ")
        ))
    }
}
