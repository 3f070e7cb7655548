//! bk-s3: S3 SDK adapter for bucketkit
//!
//! Implements the storage traits from bk-core on top of aws-sdk-s3.

pub mod client;

pub use client::S3Client;
