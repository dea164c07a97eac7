//! S3-compatible storage provider implementation.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use omnistore_common::{ObjectKey, Permissions, Result, SecretString};

use super::client::{AwsS3Client, PutRequest, S3Api};
use crate::content_type;
use crate::provider::{
    require_not_root, require_parts, AccessControl, ObjectReader, StorageProvider,
};
use crate::spool::spool;

/// Public URL of an object on AWS.
const URL_TEMPLATE_HOST: &str = "s3.amazonaws.com";

/// Maximum number of keys accepted by one DeleteObjects request.
const DELETE_BATCH: usize = 1000;

/// Characters escaped in public URLs; `/` is kept so keys read naturally.
const URL_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// S3 provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Access key ID.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: SecretString,
    /// Region, e.g. `eu-west-1`.
    pub region: String,
    /// Bucket holding every object.
    pub bucket: String,
    /// `max-age` sent as Cache-Control on every write, in seconds.
    pub cache_max_age: u64,
    /// Custom endpoint for S3-compatible stores (MinIO, R2, ...).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Address buckets by path instead of virtual host.
    #[serde(default)]
    pub force_path_style: bool,
    /// The bucket enforces owner-only access and rejects object ACLs.
    #[serde(default)]
    pub uniform_bucket_level_access: bool,
}

/// S3-compatible storage provider.
///
/// Writes carry a content type sniffed from the data and a Cache-Control
/// header. Concurrent writers to one key race; the last write wins.
pub struct S3Provider<C = AwsS3Client> {
    client: C,
    bucket: String,
    cache_control: String,
    access: AccessControl,
    endpoint: Option<String>,
}

impl S3Provider<AwsS3Client> {
    /// Create a provider talking to S3 through the AWS SDK.
    pub fn new(config: S3Config) -> Self {
        let client = AwsS3Client::new(&config);
        info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint,
            "S3 storage initialized"
        );

        Self {
            client,
            bucket: config.bucket,
            cache_control: cache_control(config.cache_max_age),
            access: AccessControl::from_uniform_flag(config.uniform_bucket_level_access),
            endpoint: config.endpoint,
        }
    }
}

impl<C: S3Api> S3Provider<C> {
    /// Create a provider over any [`S3Api`] implementation.
    pub fn with_client(
        client: C,
        bucket: impl Into<String>,
        cache_max_age: u64,
        access: AccessControl,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            cache_control: cache_control(cache_max_age),
            access,
            endpoint: None,
        }
    }

    /// Serve [`StorageProvider::absolute_url`] from a custom endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// The underlying substrate client.
    pub fn client(&self) -> &C {
        &self.client
    }

    async fn put(
        &self,
        key: &ObjectKey,
        body: &Path,
        content_type: &str,
        permissions: Permissions,
    ) -> Result<()> {
        require_not_root(key, "store")?;
        let key_str = key.as_key();
        info!(
            key = %key_str,
            bucket = %self.bucket,
            content_type,
            "Uploading to S3"
        );

        self.client
            .put_object(PutRequest {
                key: &key_str,
                body,
                content_type,
                cache_control: &self.cache_control,
                acl: self.access.write_acl(permissions),
            })
            .await
    }

    /// Every key under `prefix`, however deep, across all pages.
    async fn list_recursive(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token = None;

        loop {
            let page = self.client.list_objects(prefix, None, token).await?;
            keys.extend(page.keys);

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(keys)
    }

    async fn set_acl(&self, key: &ObjectKey, permissions: Permissions) -> Result<()> {
        match self.access {
            AccessControl::Uniform => {
                debug!(key = %key, "Bucket-level access control, ACL change ignored");
                Ok(())
            }
            AccessControl::ObjectAcl => {
                info!(key = %key, acl = %permissions, "Changing object ACL");
                self.client.put_object_acl(&key.as_key(), permissions).await
            }
        }
    }
}

fn cache_control(max_age: u64) -> String {
    format!("max-age={}", max_age)
}

#[async_trait]
impl<C: S3Api> StorageProvider for S3Provider<C> {
    fn name(&self) -> &str {
        "s3"
    }

    async fn store_file(
        &self,
        key: &ObjectKey,
        source: &Path,
        permissions: Permissions,
    ) -> Result<()> {
        let content_type = content_type::detect_file(source);
        self.put(key, source, &content_type, permissions).await
    }

    async fn store_stream(
        &self,
        key: &ObjectKey,
        reader: ObjectReader,
        content_type: Option<&str>,
        permissions: Permissions,
    ) -> Result<()> {
        // The upload needs a known length; the spool file goes away on drop.
        let temp = spool(reader, None).await?;
        let content_type = match content_type {
            Some(ct) => ct.to_string(),
            None => content_type::detect_file(temp.path()),
        };
        self.put(key, temp.path(), &content_type, permissions).await
    }

    async fn retrieve(&self, key: &ObjectKey) -> Result<ObjectReader> {
        debug!(key = %key, bucket = %self.bucket, "Retrieving from S3");
        self.client.get_object(&key.as_key()).await
    }

    async fn list(&self, prefix: &ObjectKey) -> Result<Vec<ObjectKey>> {
        let prefix_str = prefix.as_prefix();
        let mut results = Vec::new();
        let mut token = None;

        loop {
            let page = self
                .client
                .list_objects(&prefix_str, Some("/"), token)
                .await?;

            let names = page
                .keys
                .into_iter()
                .chain(page.common_prefixes)
                .filter(|name| *name != prefix_str);

            for name in names {
                match ObjectKey::parse(&name) {
                    Ok(key) => results.push(key),
                    Err(e) => warn!(key = %name, error = %e, "Skipping unaddressable key"),
                }
            }

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        results.sort();
        results.dedup();
        debug!(prefix = %prefix, count = results.len(), "Listed S3 prefix");
        Ok(results)
    }

    async fn copy(&self, source: &ObjectKey, target: &ObjectKey) -> Result<()> {
        require_not_root(target, "copy onto")?;
        info!(source = %source, target = %target, bucket = %self.bucket, "Copying S3 object");
        self.client
            .copy_object(&source.as_key(), &target.as_key())
            .await
    }

    /// Enumerate, then batch-delete.
    ///
    /// Keys added under the prefix between the listing and the delete
    /// request survive; the operation is not linearizable.
    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        require_not_root(key, "delete")?;
        let exact = key.as_key();
        let nested = key.as_prefix();

        let doomed: Vec<String> = self
            .list_recursive(&exact)
            .await?
            .into_iter()
            .filter(|k| *k == exact || k.starts_with(&nested))
            .collect();

        if doomed.is_empty() {
            debug!(key = %key, "Nothing to delete");
            return Ok(());
        }

        info!(key = %key, count = doomed.len(), bucket = %self.bucket, "Deleting from S3");
        for batch in doomed.chunks(DELETE_BATCH) {
            self.client.delete_objects(batch).await?;
        }

        Ok(())
    }

    async fn publish(&self, key: &ObjectKey) -> Result<()> {
        self.set_acl(key, Permissions::PublicRead).await
    }

    async fn unpublish(&self, key: &ObjectKey) -> Result<()> {
        self.set_acl(key, Permissions::Private).await
    }

    fn absolute_url(&self, parts: &[&str]) -> Result<String> {
        require_parts(parts)?;

        let path = parts
            .iter()
            .map(|p| p.trim_matches('/'))
            .collect::<Vec<_>>()
            .join("/");
        let path = utf8_percent_encode(&path, URL_PATH);

        Ok(match &self.endpoint {
            Some(endpoint) => format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.bucket,
                path
            ),
            None => format!("https://{}.{}/{}", self.bucket, URL_TEMPLATE_HOST, path),
        })
    }
}
