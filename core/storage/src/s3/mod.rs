//! Amazon S3 storage provider.
//!
//! Works against AWS and S3-compatible stores (custom endpoint plus
//! path-style addressing). Writes carry a canned ACL unless the bucket
//! enforces bucket-level access control.

pub mod client;
pub mod provider;

pub use client::{AwsS3Client, ListPage, PutRequest, S3Api};
pub use provider::{S3Config, S3Provider};
