//! Upload controller
//!
//! Drives a [`TransferRequest`] to completion or to a terminal error:
//!
//! - files below the size threshold (and empty files) are sent with a single
//!   put-object call;
//! - larger files are split into parts and uploaded by a bounded pool of
//!   workers pulling from the session queue;
//! - expired credentials are refreshed and the failed call retried, spending
//!   the request's retry budget;
//! - any terminal error after a multipart upload was created aborts it before
//!   the error is returned.

use std::future::Future;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinSet;

use crate::error::{FatalCause, StorageError, TransferError};
use crate::traits::{MultipartUpload, ObjectKey, StorageService};
use crate::transfer::credentials::CredentialCoordinator;
use crate::transfer::plan::{ByteRange, PartSizePolicy, plan_parts};
use crate::transfer::request::{TransferOutcome, TransferRequest};
use crate::transfer::session::UploadSession;

/// Receives upload progress
pub trait TransferProgress: Send + Sync {
    /// Called once with the source size and the number of parts (0 for a
    /// single put)
    fn started(&self, _total_bytes: u64, _parts: usize) {}

    /// Called as bytes are accepted by the storage service
    fn advanced(&self, _bytes: u64) {}
}

/// Uploads files to a [`StorageService`]
#[derive(Clone)]
pub struct UploadController {
    storage: Arc<dyn StorageService>,
    part_policy: PartSizePolicy,
    progress: Option<Arc<dyn TransferProgress>>,
}

impl UploadController {
    pub fn new(storage: Arc<dyn StorageService>) -> Self {
        Self {
            storage,
            part_policy: PartSizePolicy::default(),
            progress: None,
        }
    }

    pub fn with_part_size_policy(mut self, policy: PartSizePolicy) -> Self {
        self.part_policy = policy;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn TransferProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Upload `request` and return the destination key
    pub async fn upload(&self, request: &TransferRequest) -> Result<ObjectKey, TransferError> {
        self.upload_detailed(request).await.result
    }

    /// Upload `request` and return the result together with its attempt history
    pub async fn upload_detailed(&self, request: &TransferRequest) -> TransferOutcome {
        let size = match validate(request).await {
            Ok(size) => size,
            Err(e) => {
                tracing::error!(error = %e, "Rejected transfer request");
                return TransferOutcome {
                    attempts: Vec::new(),
                    result: Err(e),
                };
            }
        };

        tracing::info!(
            source = %request.source_path().display(),
            bucket = request.bucket(),
            key = request.key(),
            size,
            "Starting upload"
        );

        let credentials = Arc::new(CredentialCoordinator::new(request.max_retries()));
        let result = if size == 0 || size < request.size_threshold() {
            self.put_whole(request, size, &credentials).await
        } else {
            self.put_multipart(request, size, &credentials).await
        };

        match &result {
            Ok(key) => tracing::info!(bucket = request.bucket(), key = %key, "Upload complete"),
            Err(e) => tracing::error!(bucket = request.bucket(), key = request.key(), error = %e, "Upload failed"),
        }

        let attempts = credentials.finish(&result).await;
        TransferOutcome { attempts, result }
    }

    /// Run one storage call, refreshing credentials and repeating it while
    /// the retry budget allows
    async fn with_refresh<T, F, Fut>(
        &self,
        credentials: &CredentialCoordinator,
        mut call: F,
    ) -> Result<T, TransferError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        loop {
            let generation = credentials.generation().await?;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_credential_expired() => {
                    credentials
                        .recover(generation, self.storage.as_ref(), &e)
                        .await?;
                }
                Err(e) => return Err(TransferError::from_storage(e)),
            }
        }
    }

    async fn put_whole(
        &self,
        request: &TransferRequest,
        size: u64,
        credentials: &CredentialCoordinator,
    ) -> Result<ObjectKey, TransferError> {
        let data = Bytes::from(
            tokio::fs::read(request.source_path())
                .await
                .map_err(TransferError::fatal)?,
        );
        if let Some(progress) = &self.progress {
            progress.started(size, 0);
        }

        self.with_refresh(credentials, || {
            self.storage.put_object(
                request.bucket(),
                request.key(),
                data.clone(),
                request.metadata(),
            )
        })
        .await?;

        if let Some(progress) = &self.progress {
            progress.advanced(size);
        }
        Ok(request.key().to_string())
    }

    async fn put_multipart(
        &self,
        request: &TransferRequest,
        size: u64,
        credentials: &Arc<CredentialCoordinator>,
    ) -> Result<ObjectKey, TransferError> {
        let part_size = self.part_policy.part_size(size)?;
        let tasks = plan_parts(size, part_size);

        let upload_id = self
            .with_refresh(credentials, || {
                self.storage.create_multipart_upload(
                    request.bucket(),
                    request.key(),
                    request.metadata(),
                )
            })
            .await?;

        tracing::info!(
            upload_id = %upload_id,
            parts = tasks.len(),
            part_size,
            concurrency = request.max_concurrency(),
            "Multipart upload created"
        );
        if let Some(progress) = &self.progress {
            progress.started(size, tasks.len());
        }

        let session = Arc::new(UploadSession::new(
            MultipartUpload {
                bucket: request.bucket().to_string(),
                key: request.key().to_string(),
                upload_id,
            },
            tasks,
            request.max_concurrency(),
        ));

        match self.run_session(request, &session, credentials).await {
            Ok(key) => Ok(key),
            Err(e) => {
                session.abort(self.storage.as_ref()).await;
                Err(e)
            }
        }
    }

    async fn run_session(
        &self,
        request: &TransferRequest,
        session: &Arc<UploadSession>,
        credentials: &Arc<CredentialCoordinator>,
    ) -> Result<ObjectKey, TransferError> {
        let workers = session
            .concurrency_limit()
            .min(session.part_count().await)
            .max(1);

        let context = Arc::new(WorkerContext {
            storage: self.storage.clone(),
            session: session.clone(),
            credentials: credentials.clone(),
            source: request.source_path().to_path_buf(),
            progress: self.progress.clone(),
        });

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            pool.spawn(run_worker(context.clone(), worker));
        }

        let mut failure = None;
        while let Some(joined) = pool.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => Ok(()),
                Err(e) => Err(TransferError::Fatal(FatalCause::Worker(e.to_string()))),
            };

            if let Err(e) = outcome
                && failure.is_none()
            {
                tracing::debug!(error = %e, "Stopping upload workers");
                session.cancel().await;
                pool.abort_all();
                failure = Some(e);
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let parts = session.completed_parts().await?;
        self.with_refresh(credentials, || {
            self.storage
                .complete_multipart_upload(session.upload(), &parts)
        })
        .await?;
        session.mark_completed().await;

        Ok(request.key().to_string())
    }
}

struct WorkerContext {
    storage: Arc<dyn StorageService>,
    session: Arc<UploadSession>,
    credentials: Arc<CredentialCoordinator>,
    source: PathBuf,
    progress: Option<Arc<dyn TransferProgress>>,
}

async fn run_worker(context: Arc<WorkerContext>, worker: usize) -> Result<(), TransferError> {
    let mut file = tokio::fs::File::open(&context.source)
        .await
        .map_err(TransferError::fatal)?;

    while let Some((part_number, range)) = context.session.next_part().await {
        let data = match read_range(&mut file, range).await {
            Ok(data) => data,
            Err(e) => {
                context.session.halt(part_number).await;
                return Err(TransferError::fatal(e));
            }
        };

        let generation = match context.credentials.generation().await {
            Ok(generation) => generation,
            Err(e) => {
                context.session.halt(part_number).await;
                return Err(e);
            }
        };

        // Another worker may have failed while this part was being read.
        if context.session.is_cancelled().await {
            return Ok(());
        }

        tracing::debug!(worker, part_number, bytes = range.len(), "Uploading part");
        match context
            .storage
            .upload_part(context.session.upload(), part_number, data)
            .await
        {
            Ok(etag) => {
                context.session.complete_part(part_number, etag).await;
                if let Some(progress) = &context.progress {
                    progress.advanced(range.len());
                }
            }
            Err(e) if e.is_credential_expired() => {
                context.session.fail_part(part_number).await;
                if let Err(terminal) = context
                    .credentials
                    .recover(generation, context.storage.as_ref(), &e)
                    .await
                {
                    context.session.halt(part_number).await;
                    return Err(terminal);
                }
                tracing::debug!(worker, part_number, "Requeueing part after credential refresh");
                context.session.retry_part(part_number).await;
            }
            Err(e) => {
                tracing::warn!(worker, part_number, error = %e, "Part upload failed");
                context.session.halt(part_number).await;
                return Err(TransferError::from_storage(e));
            }
        }
    }

    Ok(())
}

async fn read_range(file: &mut tokio::fs::File, range: ByteRange) -> std::io::Result<Bytes> {
    file.seek(SeekFrom::Start(range.start)).await?;
    let mut buf = vec![0u8; range.len() as usize];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Reject requests that can never succeed before any storage call is made
async fn validate(request: &TransferRequest) -> Result<u64, TransferError> {
    if request.key().is_empty() {
        return Err(TransferError::InvalidArgument(
            "destination key is empty".to_string(),
        ));
    }
    if request.bucket().is_empty() {
        return Err(TransferError::InvalidArgument(
            "destination bucket is empty".to_string(),
        ));
    }
    if request.max_concurrency() == 0 {
        return Err(TransferError::InvalidArgument(
            "max concurrency must be at least 1".to_string(),
        ));
    }

    let path = request.source_path();
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        TransferError::InvalidArgument(format!("cannot access {}: {e}", path.display()))
    })?;
    if !metadata.is_file() {
        return Err(TransferError::InvalidArgument(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    tokio::fs::File::open(path).await.map_err(|e| {
        TransferError::InvalidArgument(format!("cannot read {}: {e}", path.display()))
    })?;

    Ok(metadata.len())
}
