//! Multipart upload session: part table, work queue and abort bookkeeping

use std::collections::VecDeque;

use tokio::sync::Mutex;

use crate::error::{FatalCause, TransferError};
use crate::traits::{CompletedPart, MultipartUpload, PartETag, StorageService};
use crate::transfer::plan::{ByteRange, PartStatus, PartUploadTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Completed,
    Aborted,
}

#[derive(Debug)]
struct SessionInner {
    tasks: Vec<PartUploadTask>,
    queue: VecDeque<usize>,
    state: SessionState,
    cancelled: bool,
}

impl SessionInner {
    fn task_mut(&mut self, part_number: u32) -> Option<&mut PartUploadTask> {
        let index = part_number.checked_sub(1)? as usize;
        self.tasks.get_mut(index)
    }
}

/// An open multipart upload and its parts
#[derive(Debug)]
pub struct UploadSession {
    upload: MultipartUpload,
    concurrency_limit: usize,
    inner: Mutex<SessionInner>,
}

impl UploadSession {
    /// `tasks` must be numbered 1..=n in order, as produced by `plan_parts`
    pub fn new(upload: MultipartUpload, tasks: Vec<PartUploadTask>, concurrency_limit: usize) -> Self {
        let queue = (0..tasks.len()).collect();
        Self {
            upload,
            concurrency_limit: concurrency_limit.max(1),
            inner: Mutex::new(SessionInner {
                tasks,
                queue,
                state: SessionState::Open,
                cancelled: false,
            }),
        }
    }

    pub fn upload(&self) -> &MultipartUpload {
        &self.upload
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn part_count(&self) -> usize {
        self.inner.lock().await.tasks.len()
    }

    /// Take the next pending part and mark it in flight.
    ///
    /// Returns `None` once the queue is empty or the session was cancelled.
    pub async fn next_part(&self) -> Option<(u32, ByteRange)> {
        let mut inner = self.inner.lock().await;
        if inner.cancelled || inner.state != SessionState::Open {
            return None;
        }

        let index = inner.queue.pop_front()?;
        let task = inner.tasks.get_mut(index)?;
        task.status = PartStatus::InFlight;
        Some((task.part_number, task.range))
    }

    pub async fn complete_part(&self, part_number: u32, etag: PartETag) {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.task_mut(part_number) {
            task.status = PartStatus::Completed;
            task.etag = Some(etag);
        }
    }

    /// Put a part whose credentials expired back at the head of the queue
    pub async fn retry_part(&self, part_number: u32) {
        let mut inner = self.inner.lock().await;
        let Some(task) = inner.task_mut(part_number) else {
            return;
        };
        task.status = PartStatus::Pending;
        if let Some(index) = part_number.checked_sub(1) {
            inner.queue.push_front(index as usize);
        }
    }

    pub async fn fail_part(&self, part_number: u32) {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.task_mut(part_number) {
            task.status = PartStatus::Failed;
        }
    }

    /// Stop handing out parts
    pub async fn cancel(&self) {
        let mut inner = self.inner.lock().await;
        inner.cancelled = true;
        inner.queue.clear();
    }

    /// Mark a part failed and stop handing out parts, under one lock so no
    /// other worker can take a part in between
    pub async fn halt(&self, part_number: u32) {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.task_mut(part_number) {
            task.status = PartStatus::Failed;
        }
        inner.cancelled = true;
        inner.queue.clear();
    }

    pub async fn is_cancelled(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.cancelled || inner.state != SessionState::Open
    }

    /// All parts in ascending part-number order, or an error if any part is
    /// not completed
    pub async fn completed_parts(&self) -> Result<Vec<CompletedPart>, TransferError> {
        let inner = self.inner.lock().await;
        let mut parts = Vec::with_capacity(inner.tasks.len());

        for task in &inner.tasks {
            match (&task.status, &task.etag) {
                (PartStatus::Completed, Some(etag)) => parts.push(CompletedPart {
                    part_number: task.part_number,
                    etag: etag.clone(),
                }),
                _ => {
                    return Err(TransferError::Fatal(FatalCause::Worker(format!(
                        "part {} finished in state {:?}",
                        task.part_number, task.status
                    ))));
                }
            }
        }

        parts.sort_by_key(|part| part.part_number);
        Ok(parts)
    }

    pub async fn mark_completed(&self) {
        self.inner.lock().await.state = SessionState::Completed;
    }

    /// Abort the upload on the storage side.
    ///
    /// Only the first call on an open session reaches the storage service;
    /// later calls return `false` without doing anything.
    pub async fn abort(&self, storage: &dyn StorageService) -> bool {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Open {
                return false;
            }
            inner.state = SessionState::Aborted;
            inner.cancelled = true;
            inner.queue.clear();
        }

        tracing::info!(upload_id = %self.upload.upload_id, key = %self.upload.key, "Aborting multipart upload");
        if let Err(e) = storage.abort_multipart_upload(&self.upload).await {
            tracing::warn!(
                upload_id = %self.upload.upload_id,
                error = %e,
                "Abort failed; the upload may need manual cleanup"
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{MockStorageService, UploadId};
    use crate::transfer::plan::plan_parts;

    fn session(parts: u64) -> UploadSession {
        UploadSession::new(
            MultipartUpload {
                bucket: "bucket".into(),
                key: "key".into(),
                upload_id: UploadId("upload-1".into()),
            },
            plan_parts(parts * 10, 10),
            2,
        )
    }

    #[tokio::test]
    async fn test_parts_are_handed_out_in_order() {
        let session = session(3);
        assert_eq!(session.next_part().await.map(|p| p.0), Some(1));
        assert_eq!(session.next_part().await.map(|p| p.0), Some(2));
        assert_eq!(session.next_part().await.map(|p| p.0), Some(3));
        assert!(session.next_part().await.is_none());
    }

    #[tokio::test]
    async fn test_retried_part_goes_first() {
        let session = session(3);
        let (first, _) = session.next_part().await.unwrap();
        session.retry_part(first).await;
        assert_eq!(session.next_part().await.map(|p| p.0), Some(1));
    }

    #[tokio::test]
    async fn test_completed_parts_sorted_regardless_of_completion_order() {
        let session = session(3);
        while session.next_part().await.is_some() {}
        session.complete_part(3, PartETag("c".into())).await;
        session.complete_part(1, PartETag("a".into())).await;
        session.complete_part(2, PartETag("b".into())).await;

        let parts = session.completed_parts().await.unwrap();
        let numbers: Vec<_> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(parts[0].etag, PartETag("a".into()));
    }

    #[tokio::test]
    async fn test_completed_parts_requires_every_part() {
        let session = session(2);
        session.next_part().await;
        session.complete_part(1, PartETag("a".into())).await;
        assert!(session.completed_parts().await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_stops_dispatch() {
        let session = session(3);
        session.cancel().await;
        assert!(session.next_part().await.is_none());
    }

    #[tokio::test]
    async fn test_halt_fails_part_and_stops_dispatch() {
        let session = session(3);
        let (first, _) = session.next_part().await.unwrap();
        assert!(!session.is_cancelled().await);

        session.halt(first).await;

        assert!(session.is_cancelled().await);
        assert!(session.next_part().await.is_none());
        assert!(session.completed_parts().await.is_err());
    }

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let mut storage = MockStorageService::new();
        storage
            .expect_abort_multipart_upload()
            .times(1)
            .returning(|_| Ok(()));

        let session = session(2);
        assert!(session.abort(&storage).await);
        assert!(!session.abort(&storage).await);
        assert_eq!(session.state().await, SessionState::Aborted);
        assert!(session.next_part().await.is_none());
    }

    #[tokio::test]
    async fn test_abort_after_completion_is_noop() {
        let storage = MockStorageService::new();
        let session = session(1);
        session.mark_completed().await;
        assert!(!session.abort(&storage).await);
    }
}
