//! Transfer requests and their attempt history

use std::path::{Path, PathBuf};

use crate::config::Defaults;
use crate::error::TransferError;
use crate::traits::{ObjectKey, ObjectMetadata};

/// A file-to-object transfer. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    source_path: PathBuf,
    bucket: String,
    key: String,
    size_threshold: u64,
    max_concurrency: usize,
    max_retries: u32,
    metadata: ObjectMetadata,
}

impl TransferRequest {
    pub fn builder(
        source_path: impl Into<PathBuf>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> TransferRequestBuilder {
        TransferRequestBuilder::new(source_path, bucket, key)
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Files of at least this many bytes use a multipart upload
    pub fn size_threshold(&self) -> u64 {
        self.size_threshold
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn metadata(&self) -> &ObjectMetadata {
        &self.metadata
    }
}

/// Builder for [`TransferRequest`]
#[derive(Debug, Clone)]
pub struct TransferRequestBuilder {
    request: TransferRequest,
}

impl TransferRequestBuilder {
    fn new(
        source_path: impl Into<PathBuf>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        let defaults = Defaults::default();
        Self {
            request: TransferRequest {
                source_path: source_path.into(),
                bucket: bucket.into(),
                key: key.into(),
                size_threshold: defaults.multipart_threshold,
                max_concurrency: defaults.max_concurrency,
                max_retries: defaults.max_retries,
                metadata: ObjectMetadata::new(),
            },
        }
    }

    /// Take threshold, concurrency and retries from configured defaults
    pub fn defaults(mut self, defaults: &Defaults) -> Self {
        self.request.size_threshold = defaults.multipart_threshold;
        self.request.max_concurrency = defaults.max_concurrency;
        self.request.max_retries = defaults.max_retries;
        self
    }

    pub fn size_threshold(mut self, bytes: u64) -> Self {
        self.request.size_threshold = bytes;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.request.max_concurrency = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.request.max_retries = n;
        self
    }

    pub fn metadata(mut self, metadata: ObjectMetadata) -> Self {
        self.request.metadata = metadata;
        self
    }

    pub fn metadata_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> TransferRequest {
        self.request
    }
}

/// Result of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Pending,
    Succeeded,
    Failed(String),
}

/// One credential generation of a transfer.
///
/// A new attempt starts every time credentials are refreshed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferAttempt {
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
}

/// Result of a transfer together with its attempt history
#[derive(Debug)]
pub struct TransferOutcome {
    pub attempts: Vec<TransferAttempt>,
    pub result: Result<ObjectKey, TransferError>,
}

impl TransferOutcome {
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let request = TransferRequest::builder("/tmp/a.bin", "bucket", "a.bin").build();
        assert_eq!(request.size_threshold(), crate::config::DEFAULT_MULTIPART_THRESHOLD);
        assert_eq!(request.max_concurrency(), 5);
        assert_eq!(request.max_retries(), 3);
        assert!(request.metadata().is_empty());
    }

    #[test]
    fn test_builder_overrides() {
        let request = TransferRequest::builder("/tmp/a.bin", "bucket", "a.bin")
            .size_threshold(1024)
            .max_concurrency(2)
            .max_retries(7)
            .metadata_entry("Content-Type", "image/png")
            .build();

        assert_eq!(request.size_threshold(), 1024);
        assert_eq!(request.max_concurrency(), 2);
        assert_eq!(request.max_retries(), 7);
        assert_eq!(
            request.metadata().get("Content-Type").map(String::as_str),
            Some("image/png")
        );
    }

    #[test]
    fn test_builder_from_config_defaults() {
        let defaults = Defaults {
            multipart_threshold: 42,
            max_concurrency: 9,
            max_retries: 1,
            ..Defaults::default()
        };
        let request = TransferRequest::builder("a", "b", "c")
            .defaults(&defaults)
            .build();
        assert_eq!(request.size_threshold(), 42);
        assert_eq!(request.max_concurrency(), 9);
        assert_eq!(request.max_retries(), 1);
    }
}
