//! Remote path parsing
//!
//! Remote locations are written `alias/bucket[/key]`. The key may contain
//! further slashes.

use std::fmt;

use crate::error::{Error, Result};

/// A parsed remote location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    pub alias: String,
    pub bucket: String,
    /// Empty when the path names a bucket
    pub key: String,
}

impl RemotePath {
    pub fn new(alias: impl Into<String>, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn is_bucket(&self) -> bool {
        self.key.is_empty()
    }

    /// Same alias and bucket with a different key
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self::new(&self.alias, &self.bucket, key)
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key.is_empty() {
            write!(f, "{}/{}", self.alias, self.bucket)
        } else {
            write!(f, "{}/{}/{}", self.alias, self.bucket, self.key)
        }
    }
}

/// Parse `alias/bucket[/key]`
pub fn parse_path(path: &str) -> Result<RemotePath> {
    if path.is_empty() {
        return Err(Error::InvalidPath("Path cannot be empty".to_string()));
    }

    let mut parts = path.splitn(3, '/');
    let alias = parts.next().unwrap_or_default();
    let bucket = parts.next().unwrap_or_default();
    let key = parts.next().unwrap_or_default();

    if alias.is_empty() {
        return Err(Error::InvalidPath(format!("Missing alias in '{path}'")));
    }
    if bucket.is_empty() {
        return Err(Error::InvalidPath(format!(
            "Missing bucket in '{path}' (expected alias/bucket[/key])"
        )));
    }
    validate_bucket_name(bucket)?;

    Ok(RemotePath::new(alias, bucket, key))
}

/// Parse a path that must name an object
pub fn parse_object_path(path: &str) -> Result<RemotePath> {
    let parsed = parse_path(path)?;
    if parsed.key.is_empty() || parsed.key.ends_with('/') {
        return Err(Error::InvalidPath(format!(
            "Object key is required in '{path}' (alias/bucket/key)"
        )));
    }
    Ok(parsed)
}

/// Parse a path that must name a bucket
pub fn parse_bucket_path(path: &str) -> Result<RemotePath> {
    let parsed = parse_path(path.trim_end_matches('/'))?;
    if !parsed.is_bucket() {
        return Err(Error::InvalidPath(format!(
            "Expected alias/bucket, got '{path}'"
        )));
    }
    Ok(parsed)
}

// S3 naming rules: 3-63 chars, lowercase letters, digits, dots and hyphens,
// starting and ending with a letter or digit.
fn validate_bucket_name(bucket: &str) -> Result<()> {
    let valid_len = (3..=63).contains(&bucket.len());
    let valid_chars = bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-');
    let valid_edges = bucket
        .chars()
        .next()
        .zip(bucket.chars().last())
        .is_some_and(|(first, last)| {
            first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric()
        });

    if valid_len && valid_chars && valid_edges {
        Ok(())
    } else {
        Err(Error::InvalidPath(format!("Invalid bucket name '{bucket}'")))
    }
}
