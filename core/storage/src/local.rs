//! Local filesystem storage provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use url::Url;

use crate::provider::{require_not_root, require_parts, ObjectReader, StorageProvider};
use crate::spool::{spool, SPOOL_PREFIX};
use omnistore_common::{Error, ObjectKey, Permissions, Result};

/// Filesystem provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemConfig {
    /// Directory every object key is resolved against.
    pub root: PathBuf,
}

/// Local filesystem storage provider.
///
/// Keys map to paths under a fixed root. Permissions are accepted and
/// ignored: a plain directory tree has no per-object ACL.
pub struct FilesystemProvider {
    root: PathBuf,
}

impl FilesystemProvider {
    /// Create a new filesystem provider with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    /// - The stored root is absolute
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(root)?;
        }

        Ok(Self {
            root: std::path::absolute(root)?,
        })
    }

    /// Create a provider from its configuration.
    pub fn from_config(config: FilesystemConfig) -> Result<Self> {
        Self::new(config.root)
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path of an object.
    pub fn resolve(&self, key: &ObjectKey) -> PathBuf {
        key.to_path(&self.root)
    }

    fn fault(&self, operation: &str, key: &ObjectKey, e: std::io::Error) -> Error {
        Error::Storage(format!(
            "Unable to {} '{}' under {}: {}",
            operation,
            key,
            self.root.display(),
            e
        ))
    }

    /// Write `reader` to completion beside the target, then rename it into
    /// place so readers never observe a partial object.
    async fn write_atomically(&self, key: &ObjectKey, reader: ObjectReader) -> Result<()> {
        require_not_root(key, "store")?;
        let target = self.resolve(key);
        let parent = target
            .parent()
            .ok_or_else(|| Error::InvalidInput(format!("Key '{}' has no parent", key)))?;

        fs::create_dir_all(parent)
            .await
            .map_err(|e| self.fault("create parent directories for", key, e))?;

        let temp = spool(reader, Some(parent)).await?;
        temp.persist(&target)
            .map_err(|e| self.fault("install", key, e.error))?;

        Ok(())
    }

    /// Check that `key` names a regular file.
    async fn require_file(&self, key: &ObjectKey) -> Result<PathBuf> {
        let path = self.resolve(key);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(Error::NotFound(format!(
                "'{}' is not a file under {}",
                key,
                self.root.display()
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound(format!(
                "'{}' not found under {}",
                key,
                self.root.display()
            ))),
            Err(e) => Err(self.fault("inspect", key, e)),
        }
    }
}

#[async_trait]
impl StorageProvider for FilesystemProvider {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn store_file(
        &self,
        key: &ObjectKey,
        source: &Path,
        _permissions: Permissions,
    ) -> Result<()> {
        let file = fs::File::open(source).await.map_err(|e| {
            Error::InvalidInput(format!("Cannot open source {}: {}", source.display(), e))
        })?;

        info!(key = %key, source = %source.display(), "Storing file");
        self.write_atomically(key, Box::pin(file)).await
    }

    async fn store_stream(
        &self,
        key: &ObjectKey,
        reader: ObjectReader,
        _content_type: Option<&str>,
        _permissions: Permissions,
    ) -> Result<()> {
        info!(key = %key, "Storing stream");
        self.write_atomically(key, reader).await
    }

    async fn retrieve(&self, key: &ObjectKey) -> Result<ObjectReader> {
        let path = self.require_file(key).await?;
        debug!(key = %key, "Retrieving file");

        let file = fs::File::open(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::NotFound(format!("'{}' not found", key)),
                _ => self.fault("open", key, e),
            })?;
        Ok(Box::pin(file))
    }

    async fn list(&self, prefix: &ObjectKey) -> Result<Vec<ObjectKey>> {
        let dir = self.resolve(prefix);
        debug!(prefix = %prefix, "Listing directory");

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::NotADirectory => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(self.fault("list", prefix, e)),
        };

        let mut results = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.fault("list", prefix, e))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                tracing::warn!(entry = ?file_name, "Skipping non UTF-8 entry");
                continue;
            };
            if name.starts_with(SPOOL_PREFIX) {
                continue;
            }
            match prefix.join(name) {
                Ok(child) => results.push(child),
                Err(e) => tracing::warn!(entry = name, error = %e, "Skipping unaddressable entry"),
            }
        }

        results.sort();
        Ok(results)
    }

    async fn copy(&self, source: &ObjectKey, target: &ObjectKey) -> Result<()> {
        let source_path = self.require_file(source).await?;
        let file = fs::File::open(&source_path)
            .await
            .map_err(|e| self.fault("open", source, e))?;

        info!(source = %source, target = %target, "Copying file");
        self.write_atomically(target, Box::pin(file)).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        require_not_root(key, "delete")?;
        let path = self.resolve(key);

        let meta = match fs::symlink_metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(self.fault("inspect", key, e)),
        };

        info!(key = %key, recursive = meta.is_dir(), "Deleting");
        let result = if meta.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.fault("delete", key, e)),
        }
    }

    async fn publish(&self, key: &ObjectKey) -> Result<()> {
        debug!(key = %key, "Filesystem has no object ACLs, publish ignored");
        Ok(())
    }

    async fn unpublish(&self, key: &ObjectKey) -> Result<()> {
        debug!(key = %key, "Filesystem has no object ACLs, unpublish ignored");
        Ok(())
    }

    fn absolute_url(&self, parts: &[&str]) -> Result<String> {
        require_parts(parts)?;

        let mut path = self.root.clone();
        for part in parts {
            path.push(part.trim_start_matches('/'));
        }

        Url::from_file_path(&path)
            .map(|url| url.to_string())
            .map_err(|_| Error::InvalidInput(format!("Cannot express {} as a URL", path.display())))
    }
}
