//! Part sizing and partitioning for multipart uploads
//!
//! Limits follow the S3 multipart protocol: at most 10,000 parts, at most
//! 5 GiB per part. Only the last part may be smaller than the part size.

use crate::config::DEFAULT_MIN_PART_SIZE;
use crate::error::TransferError;
use crate::traits::PartETag;

/// Maximum number of parts in one multipart upload
pub const MAX_PARTS_PER_UPLOAD: u32 = 10_000;

/// Maximum size of a single part (5 GiB)
pub const MAX_PART_SIZE_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Chooses the part size for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSizePolicy {
    min_part_size: u64,
    max_parts: u32,
    max_part_size: u64,
}

impl Default for PartSizePolicy {
    fn default() -> Self {
        Self {
            min_part_size: DEFAULT_MIN_PART_SIZE,
            max_parts: MAX_PARTS_PER_UPLOAD,
            max_part_size: MAX_PART_SIZE_BYTES,
        }
    }
}

impl PartSizePolicy {
    pub fn new(min_part_size: u64) -> Self {
        Self {
            min_part_size: min_part_size.max(1),
            ..Self::default()
        }
    }

    pub fn with_max_parts(mut self, max_parts: u32) -> Self {
        self.max_parts = max_parts.clamp(1, MAX_PARTS_PER_UPLOAD);
        self
    }

    pub fn min_part_size(&self) -> u64 {
        self.min_part_size
    }

    /// Smallest allowed part size that keeps `file_size` within `max_parts`
    pub fn part_size(&self, file_size: u64) -> Result<u64, TransferError> {
        let needed = file_size.div_ceil(u64::from(self.max_parts));
        let part_size = needed.max(self.min_part_size);

        if part_size > self.max_part_size {
            return Err(TransferError::InvalidArgument(format!(
                "file of {file_size} bytes needs parts of {part_size} bytes, above the \
                 {} byte part limit",
                self.max_part_size
            )));
        }
        Ok(part_size)
    }
}

/// Half-open byte range `[start, end)` of the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

/// One part of a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartUploadTask {
    /// 1-based
    pub part_number: u32,
    pub range: ByteRange,
    pub status: PartStatus,
    pub etag: Option<PartETag>,
}

/// Split `file_size` bytes into contiguous parts of `part_size` bytes
pub fn plan_parts(file_size: u64, part_size: u64) -> Vec<PartUploadTask> {
    let part_size = part_size.max(1);
    let mut parts = Vec::with_capacity(file_size.div_ceil(part_size) as usize);
    let mut start = 0;
    let mut part_number = 1;

    while start < file_size {
        let end = (start + part_size).min(file_size);
        parts.push(PartUploadTask {
            part_number,
            range: ByteRange { start, end },
            status: PartStatus::Pending,
            etag: None,
        });
        start = end;
        part_number += 1;
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(parts: &[PartUploadTask], file_size: u64) {
        let mut expected_start = 0;
        for (index, part) in parts.iter().enumerate() {
            assert_eq!(part.part_number as usize, index + 1);
            assert_eq!(part.range.start, expected_start, "ranges must be contiguous");
            assert!(!part.range.is_empty());
            assert_eq!(part.status, PartStatus::Pending);
            expected_start = part.range.end;
        }
        assert_eq!(expected_start, file_size);
    }

    #[test]
    fn test_plan_parts_exact_multiple() {
        let parts = plan_parts(40, 10);
        assert_eq!(parts.len(), 4);
        assert_covers(&parts, 40);
    }

    #[test]
    fn test_plan_parts_short_last_part() {
        for file_size in [1u64, 9, 11, 99, 101, 1_000_003] {
            let part_size = 10;
            let parts = plan_parts(file_size, part_size);
            assert_eq!(parts.len() as u64, file_size.div_ceil(part_size));
            assert_covers(&parts, file_size);
            let last = parts.last().unwrap();
            assert!(last.range.len() <= part_size);
        }
    }

    #[test]
    fn test_plan_parts_empty_file() {
        assert!(plan_parts(0, 10).is_empty());
    }

    #[test]
    fn test_part_size_uses_minimum_for_small_files() {
        let policy = PartSizePolicy::default();
        assert_eq!(policy.part_size(1).unwrap(), DEFAULT_MIN_PART_SIZE);
        assert_eq!(
            policy.part_size(DEFAULT_MIN_PART_SIZE * 3).unwrap(),
            DEFAULT_MIN_PART_SIZE
        );
    }

    #[test]
    fn test_part_size_grows_to_respect_part_count() {
        let policy = PartSizePolicy::default();
        // 200 GiB at 8 MiB would need 25,600 parts
        let file_size = 200 * 1024 * 1024 * 1024u64;
        let part_size = policy.part_size(file_size).unwrap();
        assert!(part_size > DEFAULT_MIN_PART_SIZE);
        assert!(file_size.div_ceil(part_size) <= u64::from(MAX_PARTS_PER_UPLOAD));
    }

    #[test]
    fn test_part_size_with_small_part_limit() {
        let policy = PartSizePolicy::new(1).with_max_parts(4);
        assert_eq!(policy.part_size(10).unwrap(), 3);
        assert_eq!(plan_parts(10, 3).len(), 4);
    }

    #[test]
    fn test_part_size_rejects_oversized_files() {
        let policy = PartSizePolicy::default();
        let too_big = MAX_PART_SIZE_BYTES * u64::from(MAX_PARTS_PER_UPLOAD) + 1;
        assert!(matches!(
            policy.part_size(too_big),
            Err(TransferError::InvalidArgument(_))
        ));
    }
}
