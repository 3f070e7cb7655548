//! Capability traits for the storage backend
//!
//! The upload controller only needs [`StorageService`]. Bucket administration
//! goes through [`BucketAdminService`], which the controller never touches.
//! Both are implemented by the S3 adapter crate and by test fakes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use jiff::Timestamp;
use serde::Serialize;

use crate::error::{AuthError, Result, StorageError};
use crate::lifecycle::LifecycleRule;

/// Object metadata attached on upload.
///
/// `Content-Type` (any case) sets the content type; every other entry is sent
/// as user metadata.
pub type ObjectMetadata = BTreeMap<String, String>;

/// Key of a stored object
pub type ObjectKey = String;

/// Opaque identifier of an open multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadId(pub String);

impl UploadId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Integrity token returned for an uploaded part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartETag(pub String);

/// Handle of an open multipart upload.
///
/// The wire protocol addresses a multipart upload by bucket, key and id, so
/// the handle carries all three.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUpload {
    pub bucket: String,
    pub key: String,
    pub upload_id: UploadId,
}

/// A finished part as listed in the completion call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: PartETag,
}

/// Data-plane operations used by the upload controller
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        metadata: &ObjectMetadata,
    ) -> std::result::Result<(), StorageError>;

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> std::result::Result<UploadId, StorageError>;

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        data: Bytes,
    ) -> std::result::Result<PartETag, StorageError>;

    /// `parts` is in ascending part-number order
    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        parts: &[CompletedPart],
    ) -> std::result::Result<(), StorageError>;

    async fn abort_multipart_upload(
        &self,
        upload: &MultipartUpload,
    ) -> std::result::Result<(), StorageError>;

    /// Obtain fresh credentials for subsequent calls
    async fn refresh_credentials(&self) -> std::result::Result<(), AuthError>;
}

/// Bucket as returned by a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<Timestamp>,
}

impl BucketInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created: None,
        }
    }
}

/// One-shot bucket administration calls
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BucketAdminService: Send + Sync {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    /// `None` when the bucket has no policy
    async fn get_bucket_policy(&self, bucket: &str) -> Result<Option<String>>;

    async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> Result<()>;

    async fn put_lifecycle_configuration(
        &self,
        bucket: &str,
        rules: &[LifecycleRule],
    ) -> Result<()>;
}
