//! Storage provider trait definition.

use async_trait::async_trait;
use std::io::Cursor;
use std::path::Path;
use std::pin::Pin;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWriteExt};

use omnistore_common::{Error, ObjectKey, Permissions, Result};

/// Readable byte stream returned by [`StorageProvider::retrieve`].
///
/// The caller owns the stream; dropping it releases the underlying file
/// handle or HTTP connection.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// How a backend applies [`Permissions`].
///
/// Selected once at construction. Under `Uniform` the bucket policy governs
/// every object: writes carry no ACL and publish/unpublish do nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessControl {
    /// Every write carries an explicit per-object ACL.
    ObjectAcl,
    /// Bucket-level policy; object ACLs are never sent.
    Uniform,
}

impl AccessControl {
    /// Pick the strategy from a uniform-bucket-level-access flag.
    pub fn from_uniform_flag(uniform_bucket_level_access: bool) -> Self {
        if uniform_bucket_level_access {
            AccessControl::Uniform
        } else {
            AccessControl::ObjectAcl
        }
    }

    /// ACL to attach to a write, if this strategy sends one.
    pub fn write_acl(&self, permissions: Permissions) -> Option<Permissions> {
        match self {
            AccessControl::ObjectAcl => Some(permissions),
            AccessControl::Uniform => None,
        }
    }
}

/// Storage provider trait for different backends.
///
/// Every backend exposes the same externally observable semantics, so call
/// sites can swap the substrate without change.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get the provider name (e.g., "filesystem", "s3", "gcs").
    fn name(&self) -> &str;

    /// Store a local file under `key`, replacing any previous object.
    ///
    /// The content type is sniffed from the file's leading bytes.
    ///
    /// # Errors
    /// - Storage fault if the substrate rejects the write
    async fn store_file(
        &self,
        key: &ObjectKey,
        source: &Path,
        permissions: Permissions,
    ) -> Result<()>;

    /// Store the full contents of `reader` under `key`.
    ///
    /// When `content_type` is `None` it is sniffed from the data.
    async fn store_stream(
        &self,
        key: &ObjectKey,
        reader: ObjectReader,
        content_type: Option<&str>,
        permissions: Permissions,
    ) -> Result<()>;

    /// Store an in-memory buffer. Prefer the streaming variants for anything
    /// large.
    async fn store_bytes(
        &self,
        key: &ObjectKey,
        data: Vec<u8>,
        content_type: &str,
        permissions: Permissions,
    ) -> Result<()> {
        self.store_stream(key, Box::pin(Cursor::new(data)), Some(content_type), permissions)
            .await
    }

    /// Open an object for reading.
    ///
    /// # Errors
    /// - `NotFound` if nothing is stored under `key`
    async fn retrieve(&self, key: &ObjectKey) -> Result<ObjectReader>;

    /// Retrieve an object into a temporary file removed when dropped.
    async fn cache_locally(&self, key: &ObjectKey) -> Result<NamedTempFile> {
        let mut reader = self.retrieve(key).await?;
        let temp = NamedTempFile::new()?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);
        tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        Ok(temp)
    }

    /// List the direct children of `prefix`.
    ///
    /// Pagination is exhausted before returning and the prefix itself is
    /// never part of the result.
    async fn list(&self, prefix: &ObjectKey) -> Result<Vec<ObjectKey>>;

    /// List the direct children of the root.
    async fn list_root(&self) -> Result<Vec<ObjectKey>> {
        self.list(&ObjectKey::root()).await
    }

    /// Copy an object without routing its bytes through the caller.
    ///
    /// # Errors
    /// - `NotFound` if `source` does not exist
    async fn copy(&self, source: &ObjectKey, target: &ObjectKey) -> Result<()>;

    /// Delete an object, or everything under it when it names a prefix.
    ///
    /// Deleting something that does not exist succeeds.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;

    /// Make an object publicly readable.
    async fn publish(&self, key: &ObjectKey) -> Result<()>;

    /// Make an object private.
    async fn unpublish(&self, key: &ObjectKey) -> Result<()>;

    /// Compose the external address of an object. No network call is made.
    ///
    /// # Errors
    /// - `InvalidInput` if `parts` is empty
    fn absolute_url(&self, parts: &[&str]) -> Result<String>;
}

/// Reject an empty `absolute_url` call before touching backend state.
pub(crate) fn require_parts(parts: &[&str]) -> Result<()> {
    if parts.is_empty() {
        return Err(Error::InvalidInput(
            "At least one relative path must be specified".to_string(),
        ));
    }
    Ok(())
}

/// Refuse to delete a whole bucket or root directory.
pub(crate) fn require_not_root(key: &ObjectKey, operation: &str) -> Result<()> {
    if key.is_root() {
        return Err(Error::InvalidInput(format!(
            "Cannot {} the storage root",
            operation
        )));
    }
    Ok(())
}
