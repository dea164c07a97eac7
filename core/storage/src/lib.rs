//! Storage provider abstraction for OmniStore.
//!
//! This crate provides one storage contract over interchangeable backends
//! (local filesystem, Amazon S3, Google Cloud Storage), a provider registry
//! for resolving a backend from JSON configuration, and a ZIP archive
//! utility.
//!
//! # Design Principles
//! - Provider isolation: callers depend only on [`StorageProvider`]
//! - Async operations: all backend I/O is async
//! - Streaming support: large objects are handled via readers and spool files
//! - Unified error semantics: a missing object is always `Error::NotFound`

pub mod content_type;
pub mod gcs;
pub mod local;
pub mod provider;
pub mod registry;
pub mod s3;
mod spool;
pub mod zipper;

pub use gcs::{GcsConfig, GcsCredentials, GcsProvider};
pub use local::{FilesystemConfig, FilesystemProvider};
pub use provider::{AccessControl, ObjectReader, StorageProvider};
pub use registry::{create_default_registry, ProviderFactory, ProviderRegistry};
pub use s3::{S3Config, S3Provider};
