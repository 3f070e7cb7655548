//! fetch command - Download a URL and upload it to a bucket
//!
//! The download is retried with backoff on transient failures. Only image
//! and video content (bmp, jpg, jpeg, png, webp, mp4) is accepted unless
//! `--any-type` is given.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use bytes::Bytes;
use clap::Args;
use tempfile::NamedTempFile;
use url::Url;

use super::get_client;
use super::put::{CONTENT_TYPE, report_upload, run_upload};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};
use bk_core::{Defaults, Error, ObjectMetadata, RetryConfig, TransferRequest, parse_path};

/// Extensions of the media types accepted by default
const ALLOWED_EXTENSIONS: &[&str] = &["bmp", "jpg", "jpeg", "png", "webp", "mp4"];

/// Download a URL and upload it
#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Source URL (http or https)
    pub url: String,

    /// Destination (alias/bucket[/key]); a missing key uses the last URL segment
    pub target: String,

    /// Accept any content type
    #[arg(long)]
    pub any_type: bool,

    /// Keep the downloaded file at this path
    #[arg(long, value_name = "PATH")]
    pub keep_local: Option<PathBuf>,

    /// Maximum number of parts in flight
    #[arg(short = 'P', long)]
    pub concurrency: Option<usize>,

    /// Attempts allowed when credentials expire mid-upload
    #[arg(long)]
    pub max_retries: Option<u32>,
}

struct Download {
    data: Bytes,
    content_type: Option<String>,
}

/// Where the downloaded bytes live until the upload finishes
enum LocalCopy {
    Temp(NamedTempFile),
    Kept(PathBuf),
}

impl LocalCopy {
    fn path(&self) -> &Path {
        match self {
            LocalCopy::Temp(file) => file.path(),
            LocalCopy::Kept(path) => path,
        }
    }
}

/// Execute the fetch command
pub async fn execute(
    args: FetchArgs,
    defaults: &Defaults,
    output_config: OutputConfig,
) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let url = match Url::parse(&args.url) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => u,
        Ok(u) => {
            formatter.error(&format!("Unsupported URL scheme '{}'", u.scheme()));
            return ExitCode::UsageError;
        }
        Err(e) => {
            formatter.error(&format!("Invalid URL '{}': {e}", args.url));
            return ExitCode::UsageError;
        }
    };

    let target = match parse_path(&args.target) {
        Ok(p) => p,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };
    let key = if target.key.is_empty() || target.key.ends_with('/') {
        match key_from_url(&url) {
            Some(name) => format!("{}{name}", target.key),
            None => {
                formatter.error(&format!("Cannot derive an object key from {url}"));
                return ExitCode::UsageError;
            }
        }
    } else {
        target.key.clone()
    };

    let client = match get_client(&target.alias, &formatter).await {
        Ok(c) => c,
        Err(code) => return code,
    };

    let download = match download(&url, &client.retry_config().await).await {
        Ok(d) => d,
        Err(e) => {
            formatter.error(&format!("{e:#}"));
            return ExitCode::NetworkError;
        }
    };

    let content_type = effective_content_type(&download, &url);
    if !args.any_type && !content_type.as_deref().is_some_and(is_allowed_media) {
        formatter.error(&format!(
            "Content type '{}' is not an allowed image or video type ({})",
            content_type.as_deref().unwrap_or("unknown"),
            ALLOWED_EXTENSIONS.join(", ")
        ));
        return ExitCode::UnsupportedFeature;
    }

    let local = match stage(&download.data, args.keep_local.as_deref(), &key).await {
        Ok(l) => l,
        Err(e) => {
            formatter.error(&format!("{e:#}"));
            return ExitCode::GeneralError;
        }
    };
    tracing::debug!(path = %local.path().display(), bytes = download.data.len(), "Download staged");

    let mut metadata = ObjectMetadata::new();
    if let Some(ct) = content_type {
        metadata.insert(CONTENT_TYPE.to_string(), ct);
    }
    let mut builder = TransferRequest::builder(local.path(), &target.bucket, &key)
        .defaults(defaults)
        .metadata(metadata);
    if let Some(concurrency) = args.concurrency {
        builder = builder.max_concurrency(concurrency);
    }
    if let Some(retries) = args.max_retries {
        builder = builder.max_retries(retries);
    }
    let request = builder.build();

    let outcome = run_upload(&client, &request, defaults, &formatter).await;
    let code = report_upload(&client, &request, outcome, &formatter).await;

    if let LocalCopy::Kept(path) = &local {
        formatter.println(&format!("Local copy kept at {}", path.display()));
    }
    code
}

/// Download `url`, retrying transient failures
async fn download(url: &Url, retry: &RetryConfig) -> anyhow::Result<Download> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("bk/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;

    let download = bk_core::retry_with_backoff(retry, || fetch_once(&http, url), is_transient)
        .await
        .with_context(|| format!("downloading {url}"))?;

    if download.data.is_empty() {
        bail!("{url} returned an empty body");
    }
    Ok(download)
}

async fn fetch_once(http: &reqwest::Client, url: &Url) -> bk_core::Result<Download> {
    let response = http
        .get(url.clone())
        .send()
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let msg = format!("HTTP {status} from {url}");
        return Err(
            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                Error::Network(msg)
            } else if status == reqwest::StatusCode::NOT_FOUND {
                Error::NotFound(msg)
            } else {
                Error::General(msg)
            },
        );
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(normalize_content_type);
    let data = response
        .bytes()
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    Ok(Download { data, content_type })
}

// Transport failures, 5xx and 429 are reported as Network errors above.
fn is_transient(error: &Error) -> bool {
    matches!(error, Error::Network(_))
}

/// Write the download to `keep` or to a temporary file
async fn stage(data: &Bytes, keep: Option<&Path>, key: &str) -> anyhow::Result<LocalCopy> {
    if let Some(path) = keep {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(path, data)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        return Ok(LocalCopy::Kept(path.to_path_buf()));
    }

    let suffix = Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let file = tempfile::Builder::new()
        .prefix("bk-fetch-")
        .suffix(&suffix)
        .tempfile()
        .context("creating temporary file")?;
    tokio::fs::write(file.path(), data)
        .await
        .with_context(|| format!("writing {}", file.path().display()))?;
    Ok(LocalCopy::Temp(file))
}

/// `image/png; charset=x` -> `image/png`
fn normalize_content_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or(value)
        .trim()
        .to_ascii_lowercase()
}

/// The server's content type, or a guess from the URL path
fn effective_content_type(download: &Download, url: &Url) -> Option<String> {
    download
        .content_type
        .clone()
        .filter(|ct| ct != "application/octet-stream")
        .or_else(|| mime_guess::from_path(url.path()).first_raw().map(str::to_string))
}

fn is_allowed_media(content_type: &str) -> bool {
    mime_guess::get_mime_extensions_str(content_type)
        .is_some_and(|exts| exts.iter().any(|ext| ALLOWED_EXTENSIONS.contains(ext)))
}

fn key_from_url(url: &Url) -> Option<String> {
    url.path_segments()?
        .rfind(|segment| !segment.is_empty())
        .map(str::to_string)
}
