//! S3 client implementation
//!
//! Wraps aws-sdk-s3 and implements the `StorageService` and
//! `BucketAdminService` traits from bk-core.

use async_trait::async_trait;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLifecycleConfiguration, BucketLocationConstraint, CompletedMultipartUpload,
    CreateBucketConfiguration, ExpirationStatus, LifecycleExpiration, LifecycleRuleFilter,
};
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use bytes::Bytes;
use tokio::sync::RwLock;

use bk_core::{
    Alias, AliasManager, AuthError, BucketAdminService, BucketInfo, CompletedPart, Error,
    LifecycleRule, MultipartUpload, ObjectMetadata, PartETag, Result, RetryConfig, StorageError,
    StorageService, UploadId,
};

const CONTENT_TYPE: &str = "content-type";

/// S3 client wrapper
///
/// The inner SDK client is replaced wholesale when credentials are refreshed;
/// calls already in flight keep the client they started with.
pub struct S3Client {
    inner: RwLock<aws_sdk_s3::Client>,
    alias: RwLock<Alias>,
}

impl S3Client {
    /// Create a new S3 client from an alias configuration
    pub async fn new(alias: Alias) -> Result<Self> {
        let client = build_client(&alias).await;

        Ok(Self {
            inner: RwLock::new(client),
            alias: RwLock::new(alias),
        })
    }

    /// Name of the alias this client was built from
    pub async fn alias_name(&self) -> String {
        self.alias.read().await.name.clone()
    }

    /// Public URL of an object under this alias' endpoint
    pub async fn object_url(&self, bucket: &str, key: &str) -> String {
        let alias = self.alias.read().await;
        let endpoint = alias.endpoint.trim_end_matches('/');
        if alias.bucket_lookup == "dns" {
            match endpoint.split_once("://") {
                Some((scheme, host)) => format!("{scheme}://{bucket}.{host}/{key}"),
                None => format!("{endpoint}/{bucket}/{key}"),
            }
        } else {
            format!("{endpoint}/{bucket}/{key}")
        }
    }

    /// Backoff settings for plain HTTP calls made on behalf of this alias
    pub async fn retry_config(&self) -> RetryConfig {
        self.alias.read().await.retry_config()
    }

    async fn client(&self) -> aws_sdk_s3::Client {
        self.inner.read().await.clone()
    }

    /// Format AWS SDK error into a detailed error message
    fn format_sdk_error<E, R>(error: &SdkError<E, R>) -> String
    where
        E: ProvideErrorMetadata + std::fmt::Display,
        R: std::fmt::Debug,
    {
        match error {
            SdkError::ServiceError(service_err) => {
                let err = service_err.err();
                let mut msg = format!("Service error: {err}");
                if let Some(code) = err.code() {
                    msg.push_str(&format!(" (code: {code})"));
                }
                msg
            }
            SdkError::ConstructionFailure(err) => {
                format!("Request construction failed: {err:?}")
            }
            SdkError::TimeoutError(_) => "Request timeout".to_string(),
            SdkError::DispatchFailure(err) => {
                format!("Network dispatch error: {err:?}")
            }
            SdkError::ResponseError(err) => {
                format!("Response error: {err:?}")
            }
            _ => error.to_string(),
        }
    }

    fn classify<E, R>(error: &SdkError<E, R>) -> StorageError
    where
        E: ProvideErrorMetadata + std::fmt::Display,
        R: std::fmt::Debug,
    {
        let message = Self::format_sdk_error(error);
        match error {
            SdkError::ServiceError(service_err) => classify_code(service_err.err().code(), message),
            SdkError::TimeoutError(_)
            | SdkError::DispatchFailure(_)
            | SdkError::ResponseError(_) => StorageError::Network(message),
            _ => StorageError::Service(message),
        }
    }

    /// Map an SDK error from a bucket administration call
    fn admin_error<E, R>(error: &SdkError<E, R>, bucket: &str) -> Error
    where
        E: ProvideErrorMetadata + std::fmt::Display,
        R: std::fmt::Debug,
    {
        let code = match error {
            SdkError::ServiceError(service_err) => service_err.err().code(),
            _ => None,
        };
        match code {
            Some("BucketAlreadyExists" | "BucketAlreadyOwnedByYou") => {
                Error::Conflict(format!("Bucket already exists: {bucket}"))
            }
            Some("NoSuchBucket" | "NotFound") => {
                Error::NotFound(format!("Bucket not found: {bucket}"))
            }
            Some("BucketNotEmpty") => Error::Conflict(format!("Bucket is not empty: {bucket}")),
            _ => Self::classify(error).into(),
        }
    }
}

/// Classify an S3 error code
pub(crate) fn classify_code(code: Option<&str>, message: String) -> StorageError {
    match code {
        Some(
            "ExpiredToken" | "ExpiredTokenException" | "TokenRefreshRequired" | "InvalidToken"
            | "RequestExpired",
        ) => StorageError::CredentialExpired(message),
        Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch") => {
            StorageError::AccessDenied(message)
        }
        Some("NoSuchBucket") => StorageError::NoSuchBucket(message),
        Some("NoSuchUpload") => StorageError::NoSuchUpload(message),
        Some(
            "InvalidRequest" | "InvalidArgument" | "InvalidPart" | "InvalidPartOrder"
            | "EntityTooSmall" | "EntityTooLarge",
        ) => StorageError::InvalidRequest(message),
        _ => StorageError::Service(message),
    }
}

/// Split object metadata into the Content-Type header and user metadata
pub(crate) fn split_metadata(metadata: &ObjectMetadata) -> (Option<&str>, Vec<(&str, &str)>) {
    let mut content_type = None;
    let mut user = Vec::new();
    for (key, value) in metadata {
        if key.eq_ignore_ascii_case(CONTENT_TYPE) {
            content_type = Some(value.as_str());
        } else {
            user.push((key.as_str(), value.as_str()));
        }
    }
    (content_type, user)
}

async fn load_sdk_config(alias: &Alias) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(alias.region.clone()))
        .endpoint_url(&alias.endpoint);

    if alias.has_static_credentials() {
        let credentials = aws_credential_types::Credentials::new(
            alias.access_key.clone(),
            alias.secret_key.clone(),
            alias.session_token.clone(),
            None,
            "bk-static-credentials",
        );
        loader = loader.credentials_provider(credentials);
    }

    loader.load().await
}

async fn build_client(alias: &Alias) -> aws_sdk_s3::Client {
    let config = load_sdk_config(alias).await;
    client_from_config(&config, alias)
}

fn client_from_config(config: &aws_config::SdkConfig, alias: &Alias) -> aws_sdk_s3::Client {
    // Path-style addressing for compatibility with non-AWS endpoints
    let s3_config = aws_sdk_s3::config::Builder::from(config)
        .force_path_style(alias.bucket_lookup == "path" || alias.bucket_lookup == "auto")
        .build();

    aws_sdk_s3::Client::from_conf(s3_config)
}

#[async_trait]
impl StorageService for S3Client {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        metadata: &ObjectMetadata,
    ) -> std::result::Result<(), StorageError> {
        let size = data.len() as i64;
        let (content_type, user_metadata) = split_metadata(metadata);

        let mut request = self
            .client()
            .await
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(size)
            .body(ByteStream::from(data));

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }
        for (k, v) in user_metadata {
            request = request.metadata(k, v);
        }

        request.send().await.map_err(|e| Self::classify(&e))?;
        tracing::debug!(bucket, key, size, "Object stored");
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> std::result::Result<UploadId, StorageError> {
        let (content_type, user_metadata) = split_metadata(metadata);

        let mut request = self
            .client()
            .await
            .create_multipart_upload()
            .bucket(bucket)
            .key(key);

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }
        for (k, v) in user_metadata {
            request = request.metadata(k, v);
        }

        let response = request.send().await.map_err(|e| Self::classify(&e))?;
        let upload_id = response.upload_id().ok_or_else(|| {
            StorageError::Service("CreateMultipartUpload returned no upload id".to_string())
        })?;

        Ok(UploadId(upload_id.to_string()))
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        data: Bytes,
    ) -> std::result::Result<PartETag, StorageError> {
        let part_number = i32::try_from(part_number).map_err(|_| {
            StorageError::InvalidRequest(format!("part number {part_number} out of range"))
        })?;

        let response = self
            .client()
            .await
            .upload_part()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .upload_id(upload.upload_id.as_str())
            .part_number(part_number)
            .content_length(data.len() as i64)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;

        let etag = response.e_tag().ok_or_else(|| {
            StorageError::Service(format!("UploadPart {part_number} returned no ETag"))
        })?;

        Ok(PartETag(etag.to_string()))
    }

    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        parts: &[CompletedPart],
    ) -> std::result::Result<(), StorageError> {
        let completed: Vec<_> = parts
            .iter()
            .map(|part| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part.part_number as i32)
                    .e_tag(&part.etag.0)
                    .build()
            })
            .collect();

        self.client()
            .await
            .complete_multipart_upload()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .upload_id(upload.upload_id.as_str())
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;

        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        upload: &MultipartUpload,
    ) -> std::result::Result<(), StorageError> {
        self.client()
            .await
            .abort_multipart_upload()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .upload_id(upload.upload_id.as_str())
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;

        Ok(())
    }

    async fn refresh_credentials(&self) -> std::result::Result<(), AuthError> {
        let current = self.alias.read().await.clone();

        // Static keys may have been rotated in the config file since startup.
        let alias = if current.has_static_credentials() {
            AliasManager::new()
                .and_then(|manager| manager.get(&current.name))
                .map_err(|e| AuthError::new(format!("reloading alias '{}': {e}", current.name)))?
        } else {
            current
        };

        let config = load_sdk_config(&alias).await;
        if !alias.has_static_credentials() {
            let provider = config.credentials_provider().ok_or_else(|| {
                AuthError::new("no credential provider available in the default chain")
            })?;
            provider
                .provide_credentials()
                .await
                .map_err(|e| AuthError::new(e.to_string()))?;
        }

        let client = client_from_config(&config, &alias);
        *self.inner.write().await = client;
        tracing::info!(alias = %alias.name, "Rebuilt S3 client with fresh credentials");
        *self.alias.write().await = alias;

        Ok(())
    }
}

#[async_trait]
impl BucketAdminService for S3Client {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let response = self
            .client()
            .await
            .list_buckets()
            .send()
            .await
            .map_err(|e| Error::from(Self::classify(&e)))?;

        let buckets = response
            .buckets()
            .iter()
            .map(|b| {
                let mut info = BucketInfo::new(b.name().unwrap_or_default());
                if let Some(creation_date) = b.creation_date() {
                    info.created = jiff::Timestamp::from_second(creation_date.secs()).ok();
                }
                info
            })
            .collect();

        Ok(buckets)
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client().await.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(service_err)) if service_err.err().is_not_found() => {
                Ok(false)
            }
            Err(e) => Err(Self::admin_error(&e, bucket)),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let region = self.alias.read().await.region.clone();
        let mut request = self.client().await.create_bucket().bucket(bucket);

        // us-east-1 rejects an explicit location constraint
        if region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region.as_str()))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| Self::admin_error(&e, bucket))?;

        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.client()
            .await
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| Self::admin_error(&e, bucket))?;

        Ok(())
    }

    async fn get_bucket_policy(&self, bucket: &str) -> Result<Option<String>> {
        match self
            .client()
            .await
            .get_bucket_policy()
            .bucket(bucket)
            .send()
            .await
        {
            Ok(response) => Ok(response.policy().map(str::to_string)),
            Err(e) if e.code() == Some("NoSuchBucketPolicy") => Ok(None),
            Err(e) => Err(Self::admin_error(&e, bucket)),
        }
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> Result<()> {
        self.client()
            .await
            .put_bucket_policy()
            .bucket(bucket)
            .policy(policy)
            .send()
            .await
            .map_err(|e| Self::admin_error(&e, bucket))?;

        Ok(())
    }

    async fn put_lifecycle_configuration(
        &self,
        bucket: &str,
        rules: &[LifecycleRule],
    ) -> Result<()> {
        let mut s3_rules = Vec::with_capacity(rules.len());
        for rule in rules {
            let status = if rule.enabled {
                ExpirationStatus::Enabled
            } else {
                ExpirationStatus::Disabled
            };
            let days = i32::try_from(rule.expiration_days).map_err(|_| {
                Error::General(format!("expiration of {} days is too large", rule.expiration_days))
            })?;

            let s3_rule = aws_sdk_s3::types::LifecycleRule::builder()
                .id(&rule.id)
                .status(status)
                .filter(LifecycleRuleFilter::builder().prefix(&rule.prefix).build())
                .expiration(LifecycleExpiration::builder().days(days).build())
                .build()
                .map_err(|e| Error::General(format!("lifecycle rule: {e}")))?;
            s3_rules.push(s3_rule);
        }

        let configuration = BucketLifecycleConfiguration::builder()
            .set_rules(Some(s3_rules))
            .build()
            .map_err(|e| Error::General(format!("lifecycle configuration: {e}")))?;

        self.client()
            .await
            .put_bucket_lifecycle_configuration()
            .bucket(bucket)
            .lifecycle_configuration(configuration)
            .send()
            .await
            .map_err(|e| Self::admin_error(&e, bucket))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_token_codes_are_recoverable() {
        for code in [
            "ExpiredToken",
            "ExpiredTokenException",
            "TokenRefreshRequired",
            "InvalidToken",
        ] {
            let err = classify_code(Some(code), "msg".to_string());
            assert!(err.is_credential_expired(), "{code} should be recoverable");
        }
    }

    #[test]
    fn test_other_codes_are_fatal() {
        assert_eq!(
            classify_code(Some("AccessDenied"), "m".into()),
            StorageError::AccessDenied("m".into())
        );
        assert_eq!(
            classify_code(Some("NoSuchUpload"), "m".into()),
            StorageError::NoSuchUpload("m".into())
        );
        assert_eq!(
            classify_code(Some("NoSuchBucket"), "m".into()),
            StorageError::NoSuchBucket("m".into())
        );
        assert_eq!(
            classify_code(Some("SlowDown"), "m".into()),
            StorageError::Service("m".into())
        );
        assert_eq!(
            classify_code(None, "m".into()),
            StorageError::Service("m".into())
        );
    }

    #[test]
    fn test_split_metadata() {
        let mut metadata = ObjectMetadata::new();
        metadata.insert("Content-Type".into(), "image/png".into());
        metadata.insert("origin".into(), "camera".into());

        let (content_type, user) = split_metadata(&metadata);
        assert_eq!(content_type, Some("image/png"));
        assert_eq!(user, vec![("origin", "camera")]);
    }

    #[tokio::test]
    async fn test_object_url_path_style() {
        let alias = Alias::new("local", "http://localhost:9000/", "ak", "sk");
        let client = S3Client::new(alias).await.unwrap();
        assert_eq!(
            client.object_url("photos", "2024/cat.png").await,
            "http://localhost:9000/photos/2024/cat.png"
        );
        assert_eq!(client.alias_name().await, "local");
    }

    #[tokio::test]
    async fn test_object_url_virtual_hosted() {
        let mut alias = Alias::new("aws", "https://s3.amazonaws.com", "ak", "sk");
        alias.bucket_lookup = "dns".to_string();
        let client = S3Client::new(alias).await.unwrap();
        assert_eq!(
            client.object_url("photos", "cat.png").await,
            "https://photos.s3.amazonaws.com/cat.png"
        );
    }
}
