//! bk-core: Core library for the bucketkit CLI
//!
//! This crate provides the core functionality for bucketkit, including:
//! - Configuration and alias management
//! - Path parsing and resolution
//! - `StorageService` / `BucketAdminService` traits for storage operations
//! - The upload controller: single put or multipart, bounded concurrency,
//!   credential refresh under a retry budget, mandatory abort on failure
//! - Bucket policy and lifecycle helpers
//!
//! This crate is independent of any specific S3 SDK; the `bk-s3` crate
//! provides the AWS SDK implementation of the traits.

pub mod alias;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod path;
pub mod policy;
pub mod retry;
pub mod traits;
pub mod transfer;

pub use alias::{Alias, AliasManager, RetryConfig};
pub use config::{Config, ConfigManager, Defaults};
pub use error::{AuthError, Error, ErrorClass, FatalCause, Result, StorageError, TransferError};
pub use lifecycle::{LifecycleRule, apply_expiration};
pub use path::{RemotePath, parse_bucket_path, parse_object_path, parse_path};
pub use policy::{PolicyDocument, apply_public_read_policy, public_read_policy, validate_policy};
pub use retry::{RetryBuilder, is_retryable_error, retry_with_backoff};
pub use traits::{
    BucketAdminService, BucketInfo, CompletedPart, MultipartUpload, ObjectKey, ObjectMetadata,
    PartETag, StorageService, UploadId,
};
pub use transfer::{
    PartSizePolicy, TransferOutcome, TransferProgress, TransferRequest, UploadController,
};
