//! Instrumented in-memory `StorageService` for controller tests

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::error::{AuthError, StorageError};
use crate::traits::{
    CompletedPart, MultipartUpload, ObjectMetadata, PartETag, StorageService, UploadId,
};

#[derive(Debug, Default)]
struct Script {
    part_failures: HashMap<u32, VecDeque<StorageError>>,
    put_failures: VecDeque<StorageError>,
    create_failures: VecDeque<StorageError>,
    complete_failures: VecDeque<StorageError>,
    refresh_failures: VecDeque<AuthError>,
}

#[derive(Debug, Default)]
struct Record {
    puts: Vec<(String, String, Bytes, ObjectMetadata)>,
    creates: Vec<(String, String, ObjectMetadata)>,
    /// Every dispatched part upload, in dispatch order
    part_attempts: Vec<u32>,
    /// Successful part uploads, in completion order
    part_completions: Vec<u32>,
    part_data: BTreeMap<u32, Bytes>,
    completes: Vec<Vec<CompletedPart>>,
    aborts: Vec<UploadId>,
    refreshes: usize,
    objects: HashMap<String, Bytes>,
}

#[derive(Default)]
pub struct FakeStorage {
    script: Mutex<Script>,
    record: Mutex<Record>,
    credentials_expired: Mutex<bool>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Set when a part upload has returned a non-retryable error
    fatal_returned: AtomicBool,
    dispatched_after_fatal: AtomicUsize,
    part_delay: Mutex<Option<DelayFn>>,
    refresh_delay: Mutex<Duration>,
}

type DelayFn = Box<dyn Fn(u32) -> Duration + Send + Sync>;

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` uploads of `part_number` with `error`
    pub fn fail_part(&self, part_number: u32, times: usize, error: StorageError) {
        let mut script = self.script.lock().unwrap();
        let queue = script.part_failures.entry(part_number).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    pub fn fail_put(&self, times: usize, error: StorageError) {
        let mut script = self.script.lock().unwrap();
        script.put_failures.extend(std::iter::repeat_n(error, times));
    }

    pub fn fail_create(&self, error: StorageError) {
        self.script.lock().unwrap().create_failures.push_back(error);
    }

    pub fn fail_complete(&self, times: usize, error: StorageError) {
        let mut script = self.script.lock().unwrap();
        script.complete_failures.extend(std::iter::repeat_n(error, times));
    }

    pub fn fail_refresh(&self, error: AuthError) {
        self.script.lock().unwrap().refresh_failures.push_back(error);
    }

    /// Every part upload fails with `CredentialExpired` until a refresh
    pub fn expire_credentials(&self) {
        *self.credentials_expired.lock().unwrap() = true;
    }

    pub fn set_part_delay(&self, delay: impl Fn(u32) -> Duration + Send + Sync + 'static) {
        *self.part_delay.lock().unwrap() = Some(Box::new(delay));
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn put_count(&self) -> usize {
        self.record.lock().unwrap().puts.len()
    }

    pub fn puts(&self) -> Vec<(String, String, Bytes, ObjectMetadata)> {
        self.record.lock().unwrap().puts.clone()
    }

    pub fn create_count(&self) -> usize {
        self.record.lock().unwrap().creates.len()
    }

    pub fn part_attempts(&self) -> Vec<u32> {
        self.record.lock().unwrap().part_attempts.clone()
    }

    pub fn attempts_for(&self, part_number: u32) -> usize {
        self.part_attempts()
            .into_iter()
            .filter(|p| *p == part_number)
            .count()
    }

    pub fn part_completions(&self) -> Vec<u32> {
        self.record.lock().unwrap().part_completions.clone()
    }

    pub fn part_sizes(&self) -> Vec<(u32, usize)> {
        self.record
            .lock()
            .unwrap()
            .part_data
            .iter()
            .map(|(n, d)| (*n, d.len()))
            .collect()
    }

    pub fn completes(&self) -> Vec<Vec<CompletedPart>> {
        self.record.lock().unwrap().completes.clone()
    }

    pub fn abort_count(&self) -> usize {
        self.record.lock().unwrap().aborts.len()
    }

    pub fn refresh_count(&self) -> usize {
        self.record.lock().unwrap().refreshes
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Part uploads that started after a part had already failed fatally
    pub fn dispatched_after_fatal(&self) -> usize {
        self.dispatched_after_fatal.load(Ordering::SeqCst)
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.record.lock().unwrap().objects.get(key).cloned()
    }

    fn total_calls(&self) -> usize {
        let record = self.record.lock().unwrap();
        record.puts.len()
            + record.creates.len()
            + record.part_attempts.len()
            + record.completes.len()
            + record.aborts.len()
            + record.refreshes
    }

    pub fn no_calls(&self) -> bool {
        self.total_calls() == 0
    }
}

#[async_trait]
impl StorageService for FakeStorage {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        let mut record = self.record.lock().unwrap();
        record.puts.push((
            bucket.to_string(),
            key.to_string(),
            data.clone(),
            metadata.clone(),
        ));
        if let Some(err) = self.script.lock().unwrap().put_failures.pop_front() {
            return Err(err);
        }
        record.objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<UploadId, StorageError> {
        let mut record = self.record.lock().unwrap();
        record
            .creates
            .push((bucket.to_string(), key.to_string(), metadata.clone()));
        if let Some(err) = self.script.lock().unwrap().create_failures.pop_front() {
            return Err(err);
        }
        Ok(UploadId(format!("upload-{}", record.creates.len())))
    }

    async fn upload_part(
        &self,
        _upload: &MultipartUpload,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartETag, StorageError> {
        if self.fatal_returned.load(Ordering::SeqCst) {
            self.dispatched_after_fatal.fetch_add(1, Ordering::SeqCst);
        }
        self.record.lock().unwrap().part_attempts.push(part_number);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .part_delay
            .lock()
            .unwrap()
            .as_ref()
            .map(|delay| delay(part_number));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if *self.credentials_expired.lock().unwrap() {
            return Err(StorageError::CredentialExpired("ExpiredToken".into()));
        }
        let scripted = self
            .script
            .lock()
            .unwrap()
            .part_failures
            .get_mut(&part_number)
            .and_then(VecDeque::pop_front);
        if let Some(err) = scripted {
            if !err.is_credential_expired() {
                self.fatal_returned.store(true, Ordering::SeqCst);
            }
            return Err(err);
        }

        let mut record = self.record.lock().unwrap();
        record.part_completions.push(part_number);
        record.part_data.insert(part_number, data);
        Ok(PartETag(format!("etag-{part_number}")))
    }

    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        let mut record = self.record.lock().unwrap();
        record.completes.push(parts.to_vec());
        if let Some(err) = self.script.lock().unwrap().complete_failures.pop_front() {
            return Err(err);
        }

        let mut object = BytesMut::new();
        for part in parts {
            if let Some(data) = record.part_data.get(&part.part_number) {
                object.extend_from_slice(data);
            }
        }
        record.objects.insert(upload.key.clone(), object.freeze());
        Ok(())
    }

    async fn abort_multipart_upload(&self, upload: &MultipartUpload) -> Result<(), StorageError> {
        self.record
            .lock()
            .unwrap()
            .aborts
            .push(upload.upload_id.clone());
        Ok(())
    }

    async fn refresh_credentials(&self) -> Result<(), AuthError> {
        self.record.lock().unwrap().refreshes += 1;
        let delay = *self.refresh_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.script.lock().unwrap().refresh_failures.pop_front() {
            return Err(err);
        }
        *self.credentials_expired.lock().unwrap() = false;
        Ok(())
    }
}
