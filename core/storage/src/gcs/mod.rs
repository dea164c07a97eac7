//! Google Cloud Storage provider.
//!
//! This module provides a storage backend on the GCS JSON API with:
//! - Generation-conditioned writes, so concurrent writers cannot silently
//!   overwrite each other
//! - Streamed multipart uploads from a local spool file
//! - Anonymous, static bearer token, or refresh-token authentication
//! - Either per-object ACLs or uniform bucket-level access

pub mod auth;
pub mod client;
pub mod provider;

pub use auth::{GcsCredentials, TokenManager, TokenProvider, Tokens};
pub use client::{GcsApi, GcsClient, GcsObject, ObjectPage, Precondition, UploadRequest};
pub use provider::{GcsConfig, GcsProvider};
