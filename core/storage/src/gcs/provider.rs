//! Google Cloud Storage provider implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use omnistore_common::{Error, ObjectKey, Permissions, Result};

use super::auth::{token_provider, GcsCredentials};
use super::client::{GcsApi, GcsClient, Precondition, UploadRequest};
use crate::content_type;
use crate::provider::{
    require_not_root, require_parts, AccessControl, ObjectReader, StorageProvider,
};
use crate::spool::spool;

/// Google Cloud Storage provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcsConfig {
    /// Project owning the bucket.
    pub project_id: String,
    /// Bucket holding every object.
    pub bucket: String,
    /// The bucket uses uniform bucket-level access instead of object ACLs.
    #[serde(default)]
    pub uniform_bucket_level_access: bool,
    /// `max-age` stored as Cache-Control metadata, in seconds.
    #[serde(default)]
    pub cache_max_age: Option<u64>,
    /// API endpoint override, e.g. a local emulator.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// How requests are authorized.
    #[serde(default)]
    pub credentials: Option<GcsCredentials>,
    /// JSON file holding the credentials, e.g. the gcloud
    /// application-default credentials. Exclusive with `credentials`.
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
}

impl GcsConfig {
    /// The credentials given inline or loaded from `credentials_file`.
    ///
    /// # Errors
    /// - `InvalidInput` unless exactly one source is configured
    /// - The credentials file is unreadable or malformed
    pub fn resolve_credentials(&self) -> Result<GcsCredentials> {
        match (&self.credentials, &self.credentials_file) {
            (Some(credentials), None) => Ok(credentials.clone()),
            (None, Some(path)) => GcsCredentials::from_file(path),
            (Some(_), Some(_)) => Err(Error::InvalidInput(
                "Set either credentials or credentials_file, not both".to_string(),
            )),
            (None, None) => Err(Error::InvalidInput(
                "GCS configuration requires credentials or credentials_file".to_string(),
            )),
        }
    }
}

/// Google Cloud Storage provider.
///
/// Every write is conditioned on the generation observed just before it:
/// overwriting requires the object to still be at that generation, creating
/// requires it to still be absent. A writer racing another one fails with
/// [`Error::Conflict`] instead of clobbering the newer content.
pub struct GcsProvider<C = GcsClient> {
    client: C,
    bucket: String,
    access: AccessControl,
    cache_control: Option<String>,
}

impl GcsProvider<GcsClient> {
    /// Create a provider talking to the GCS JSON API.
    ///
    /// # Errors
    /// - Credentials missing or unreadable
    /// - HTTP client cannot be built
    pub fn new(config: GcsConfig) -> Result<Self> {
        let credentials = config.resolve_credentials()?;
        let http = Client::builder()
            .user_agent("OmniStore/0.1")
            .build()
            .map_err(|e| Error::Storage(format!("Failed to create HTTP client: {}", e)))?;

        let tokens = token_provider(&credentials, http.clone());
        let client = GcsClient::new(http, config.endpoint.as_deref(), &config.bucket, tokens);

        info!(
            project = %config.project_id,
            bucket = %config.bucket,
            uniform = config.uniform_bucket_level_access,
            "GCS storage initialized"
        );

        Ok(Self::with_client(
            client,
            config.bucket,
            AccessControl::from_uniform_flag(config.uniform_bucket_level_access),
            config.cache_max_age,
        ))
    }
}

impl<C: GcsApi> GcsProvider<C> {
    /// Create a provider over any [`GcsApi`] implementation.
    pub fn with_client(
        client: C,
        bucket: impl Into<String>,
        access: AccessControl,
        cache_max_age: Option<u64>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            access,
            cache_control: cache_max_age.map(|age| format!("max-age={}", age)),
        }
    }

    /// The underlying substrate client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Condition for replacing whatever currently lives at `name`.
    async fn precondition(&self, name: &str) -> Result<Precondition> {
        Ok(match self.client.get_object(name).await? {
            Some(existing) => Precondition::GenerationMatch(existing.generation),
            None => Precondition::DoesNotExist,
        })
    }

    fn fault(&self, action: &str, name: &str, err: Error) -> Error {
        if !err.is_not_found() {
            error!(bucket = %self.bucket, name, error = %err, "Unable to {} on GCS", action);
        }
        err
    }

    async fn upload(
        &self,
        key: &ObjectKey,
        body: &Path,
        content_type: &str,
        permissions: Permissions,
    ) -> Result<()> {
        require_not_root(key, "store")?;
        let name = key.as_key();
        let precondition = self
            .precondition(&name)
            .await
            .map_err(|e| self.fault("inspect", &name, e))?;

        info!(
            name = %name,
            bucket = %self.bucket,
            content_type,
            precondition = ?precondition,
            "Uploading to GCS"
        );

        let request = UploadRequest {
            name: &name,
            body,
            content_type,
            cache_control: self.cache_control.as_deref(),
            precondition,
            acl: self.access.write_acl(permissions),
        };

        self.client
            .upload(request)
            .await
            .map(|_| ())
            .map_err(|e| self.fault("store", &name, e))
    }

    /// Every name under `prefix`, however deep, across all pages.
    async fn list_recursive(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut token = None;

        loop {
            let page = self.client.list(prefix, None, token).await?;
            names.extend(page.names);

            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(names)
    }

    async fn delete_if_present(&self, name: &str) -> Result<()> {
        match self.client.delete(name).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(self.fault("delete", name, e)),
        }
    }

    fn acl_change(&self, key: &ObjectKey, operation: &str) -> Result<()> {
        match self.access {
            AccessControl::Uniform => {
                debug!(key = %key, "Uniform bucket-level access, {} ignored", operation);
                Ok(())
            }
            AccessControl::ObjectAcl => Err(Error::Unsupported(format!(
                "{} is not implemented for fine-grained ACL bucket {}",
                operation, self.bucket
            ))),
        }
    }
}

#[async_trait]
impl<C: GcsApi> StorageProvider for GcsProvider<C> {
    fn name(&self) -> &str {
        "gcs"
    }

    async fn store_file(
        &self,
        key: &ObjectKey,
        source: &Path,
        permissions: Permissions,
    ) -> Result<()> {
        let content_type = content_type::detect_file(source);
        self.upload(key, source, &content_type, permissions).await
    }

    async fn store_stream(
        &self,
        key: &ObjectKey,
        reader: ObjectReader,
        content_type: Option<&str>,
        permissions: Permissions,
    ) -> Result<()> {
        let temp = spool(reader, None).await?;
        let content_type = match content_type {
            Some(ct) => ct.to_string(),
            None => content_type::detect_file(temp.path()),
        };
        self.upload(key, temp.path(), &content_type, permissions).await
    }

    async fn retrieve(&self, key: &ObjectKey) -> Result<ObjectReader> {
        let name = key.as_key();
        debug!(name = %name, bucket = %self.bucket, "Retrieving from GCS");
        self.client
            .download(&name)
            .await
            .map_err(|e| self.fault("retrieve", &name, e))
    }

    async fn list(&self, prefix: &ObjectKey) -> Result<Vec<ObjectKey>> {
        let prefix_str = prefix.as_prefix();
        let mut results = Vec::new();
        let mut token = None;

        loop {
            let page = self
                .client
                .list(&prefix_str, Some("/"), token)
                .await
                .map_err(|e| self.fault("list", &prefix_str, e))?;

            let names = page
                .names
                .into_iter()
                .chain(page.prefixes)
                .filter(|name| *name != prefix_str);

            for name in names {
                match ObjectKey::parse(&name) {
                    Ok(key) => results.push(key),
                    Err(e) => warn!(name = %name, error = %e, "Skipping unaddressable object"),
                }
            }

            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        results.sort();
        results.dedup();
        debug!(prefix = %prefix, count = results.len(), "Listed GCS prefix");
        Ok(results)
    }

    async fn copy(&self, source: &ObjectKey, target: &ObjectKey) -> Result<()> {
        require_not_root(target, "copy onto")?;
        let source_name = source.as_key();
        let target_name = target.as_key();

        let precondition = self
            .precondition(&target_name)
            .await
            .map_err(|e| self.fault("inspect", &target_name, e))?;

        info!(
            source = %source_name,
            target = %target_name,
            bucket = %self.bucket,
            precondition = ?precondition,
            "Copying GCS object"
        );

        self.client
            .copy(&source_name, &target_name, precondition)
            .await
            .map(|_| ())
            .map_err(|e| self.fault("copy", &source_name, e))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        require_not_root(key, "delete")?;
        let name = key.as_key();

        let mut doomed = self
            .list_recursive(&key.as_prefix())
            .await
            .map_err(|e| self.fault("list", &name, e))?;
        doomed.push(name.clone());

        info!(name = %name, candidates = doomed.len(), bucket = %self.bucket, "Deleting from GCS");
        for object in &doomed {
            self.delete_if_present(object).await?;
        }

        Ok(())
    }

    async fn publish(&self, key: &ObjectKey) -> Result<()> {
        self.acl_change(key, "publish")
    }

    async fn unpublish(&self, key: &ObjectKey) -> Result<()> {
        self.acl_change(key, "unpublish")
    }

    fn absolute_url(&self, parts: &[&str]) -> Result<String> {
        require_parts(parts)?;
        Err(Error::Unsupported(format!(
            "absolute URLs are not implemented for GCS bucket {}",
            self.bucket
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcs::client::{GcsObject, ObjectPage};
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    #[derive(Debug, Clone)]
    struct StoredObject {
        data: Vec<u8>,
        generation: i64,
        content_type: String,
        cache_control: Option<String>,
        acl: Option<Permissions>,
    }

    #[derive(Default)]
    struct State {
        objects: BTreeMap<String, StoredObject>,
        next_generation: i64,
    }

    impl State {
        fn bump_generation(&mut self) -> i64 {
            self.next_generation += 1;
            self.next_generation
        }

        fn check(&self, name: &str, precondition: Precondition) -> Result<()> {
            let current = self.objects.get(name).map(|o| o.generation);
            let holds = match precondition {
                Precondition::DoesNotExist => current.is_none(),
                Precondition::GenerationMatch(expected) => current == Some(expected),
            };
            if holds {
                Ok(())
            } else {
                Err(Error::Conflict(format!("Precondition failed for {}", name)))
            }
        }
    }

    /// In-memory bucket enforcing generation preconditions.
    ///
    /// With `race` set, every metadata read is followed by a write from another
    /// client, so the next conditional write sees a stale generation.
    #[derive(Default)]
    struct MemoryGcs {
        state: Mutex<State>,
        race: AtomicBool,
        page_size: usize,
    }

    impl MemoryGcs {
        fn with_page_size(page_size: usize) -> Self {
            Self {
                page_size,
                ..Default::default()
            }
        }

        fn object(&self, name: &str) -> Option<StoredObject> {
            self.state.lock().unwrap().objects.get(name).cloned()
        }

        /// Simulate another client overwriting (or creating) `name`.
        fn external_write(&self, name: &str, data: &[u8]) {
            let mut state = self.state.lock().unwrap();
            let generation = state.bump_generation();
            state.objects.insert(
                name.to_string(),
                StoredObject {
                    data: data.to_vec(),
                    generation,
                    content_type: "binary/octet-stream".to_string(),
                    cache_control: None,
                    acl: None,
                },
            );
        }

        fn meta(name: &str, object: &StoredObject) -> GcsObject {
            GcsObject {
                name: name.to_string(),
                generation: object.generation,
                content_type: Some(object.content_type.clone()),
                cache_control: object.cache_control.clone(),
            }
        }

        fn not_found(name: &str) -> Error {
            Error::NotFound(format!("Key {} not found", name))
        }
    }

    #[async_trait]
    impl GcsApi for MemoryGcs {
        async fn get_object(&self, name: &str) -> Result<Option<GcsObject>> {
            let observed = self.object(name).map(|o| Self::meta(name, &o));
            if self.race.load(Ordering::SeqCst) {
                self.external_write(name, b"concurrent");
            }
            Ok(observed)
        }

        async fn upload(&self, request: UploadRequest<'_>) -> Result<GcsObject> {
            let data = std::fs::read(request.body)?;
            let mut state = self.state.lock().unwrap();
            state.check(request.name, request.precondition)?;

            let generation = state.bump_generation();
            let object = StoredObject {
                data,
                generation,
                content_type: request.content_type.to_string(),
                cache_control: request.cache_control.map(String::from),
                acl: request.acl,
            };
            let meta = Self::meta(request.name, &object);
            state.objects.insert(request.name.to_string(), object);
            Ok(meta)
        }

        async fn download(&self, name: &str) -> Result<ObjectReader> {
            let object = self.object(name).ok_or_else(|| Self::not_found(name))?;
            Ok(Box::pin(Cursor::new(object.data)))
        }

        async fn list(
            &self,
            prefix: &str,
            delimiter: Option<&str>,
            page_token: Option<String>,
        ) -> Result<ObjectPage> {
            let state = self.state.lock().unwrap();
            let mut entries: Vec<(String, bool)> = Vec::new();

            for name in state.objects.keys().filter(|k| k.starts_with(prefix)) {
                let rest = &name[prefix.len()..];
                match delimiter.and_then(|d| rest.find(d).map(|i| i + d.len())) {
                    Some(end) => {
                        let common = format!("{}{}", prefix, &rest[..end]);
                        if entries.last().map(|(n, _)| n) != Some(&common) {
                            entries.push((common, true));
                        }
                    }
                    None => entries.push((name.clone(), false)),
                }
            }

            let page_size = if self.page_size == 0 { usize::MAX } else { self.page_size };
            let remaining: Vec<(String, bool)> = entries
                .into_iter()
                .filter(|(n, _)| page_token.as_ref().map_or(true, |t| n > t))
                .collect();
            let page: Vec<(String, bool)> = remaining.iter().take(page_size).cloned().collect();
            let next_page_token = if remaining.len() > page.len() {
                page.last().map(|(n, _)| n.clone())
            } else {
                None
            };

            Ok(ObjectPage {
                names: page.iter().filter(|(_, p)| !p).map(|(n, _)| n.clone()).collect(),
                prefixes: page.iter().filter(|(_, p)| *p).map(|(n, _)| n.clone()).collect(),
                next_page_token,
            })
        }

        async fn copy(
            &self,
            source: &str,
            target: &str,
            precondition: Precondition,
        ) -> Result<GcsObject> {
            let mut state = self.state.lock().unwrap();
            let object = state
                .objects
                .get(source)
                .cloned()
                .ok_or_else(|| Self::not_found(source))?;
            state.check(target, precondition)?;

            let generation = state.bump_generation();
            let copied = StoredObject { generation, ..object };
            let meta = Self::meta(target, &copied);
            state.objects.insert(target.to_string(), copied);
            Ok(meta)
        }

        async fn delete(&self, name: &str) -> Result<()> {
            self.state
                .lock()
                .unwrap()
                .objects
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| Self::not_found(name))
        }
    }

    fn provider(access: AccessControl) -> GcsProvider<MemoryGcs> {
        GcsProvider::with_client(MemoryGcs::default(), "assets", access, Some(300))
    }

    fn key(s: &str) -> ObjectKey {
        ObjectKey::parse(s).unwrap()
    }

    async fn read_all(gcs: &GcsProvider<MemoryGcs>, k: &ObjectKey) -> Vec<u8> {
        let mut reader = gcs.retrieve(k).await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_store_and_overwrite_follow_generations() {
        let gcs = provider(AccessControl::ObjectAcl);
        let k = key("docs/a.txt");

        gcs.store_bytes(&k, b"v1".to_vec(), "text/plain", Permissions::PublicRead)
            .await
            .unwrap();
        let first = gcs.client().object("docs/a.txt").unwrap();

        gcs.store_bytes(&k, b"v2".to_vec(), "text/plain", Permissions::Private)
            .await
            .unwrap();
        let second = gcs.client().object("docs/a.txt").unwrap();

        assert!(second.generation > first.generation);
        assert_eq!(second.acl, Some(Permissions::Private));
        assert_eq!(second.cache_control.as_deref(), Some("max-age=300"));
        assert_eq!(read_all(&gcs, &k).await, b"v2");
    }

    #[tokio::test]
    async fn test_stale_generation_write_fails() {
        let gcs = provider(AccessControl::ObjectAcl);
        gcs.store_bytes(&key("a"), b"mine".to_vec(), "text/plain", Permissions::Private)
            .await
            .unwrap();
        let stale = gcs.client().object("a").unwrap().generation;

        gcs.client().external_write("a", b"theirs");

        let dir = tempfile::tempdir().unwrap();
        let body = dir.path().join("body");
        std::fs::write(&body, b"overwrite").unwrap();
        let result = gcs
            .client()
            .upload(UploadRequest {
                name: "a",
                body: &body,
                content_type: "text/plain",
                cache_control: None,
                precondition: Precondition::GenerationMatch(stale),
                acl: None,
            })
            .await;

        assert!(result.err().unwrap().is_conflict());
        assert_eq!(gcs.client().object("a").unwrap().data, b"theirs");
    }

    #[tokio::test]
    async fn test_racing_writer_is_rejected() {
        let gcs = provider(AccessControl::ObjectAcl);
        gcs.store_bytes(&key("a"), b"v1".to_vec(), "text/plain", Permissions::Private)
            .await
            .unwrap();

        gcs.client().race.store(true, Ordering::SeqCst);
        let err = gcs
            .store_bytes(&key("a"), b"v2".to_vec(), "text/plain", Permissions::Private)
            .await
            .err()
            .unwrap();

        assert!(err.is_conflict());
        assert_eq!(gcs.client().object("a").unwrap().data, b"concurrent");
    }

    #[tokio::test]
    async fn test_racing_creation_is_rejected() {
        let gcs = provider(AccessControl::Uniform);
        gcs.client().race.store(true, Ordering::SeqCst);

        let err = gcs
            .store_bytes(&key("fresh"), b"mine".to_vec(), "text/plain", Permissions::Private)
            .await
            .err()
            .unwrap();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_uniform_access_omits_acl_and_ignores_publish() {
        let gcs = provider(AccessControl::Uniform);
        gcs.store_bytes(&key("u"), vec![1], "binary/octet-stream", Permissions::PublicRead)
            .await
            .unwrap();

        assert_eq!(gcs.client().object("u").unwrap().acl, None);
        gcs.publish(&key("u")).await.unwrap();
        gcs.unpublish(&key("u")).await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_unsupported_with_object_acls() {
        let gcs = provider(AccessControl::ObjectAcl);
        assert!(matches!(gcs.publish(&key("u")).await, Err(Error::Unsupported(_))));
        assert!(matches!(gcs.unpublish(&key("u")).await, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_store_file_sniffs_content_type() {
        let gcs = provider(AccessControl::ObjectAcl);
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("anim.bin");
        std::fs::write(&source, b"GIF89a\x01\x00\x01\x00").unwrap();

        gcs.store_file(&key("anim"), &source, Permissions::Private).await.unwrap();
        assert_eq!(gcs.client().object("anim").unwrap().content_type, "image/gif");
    }

    #[tokio::test]
    async fn test_retrieve_missing_is_not_found() {
        let gcs = provider(AccessControl::ObjectAcl);
        let err = gcs.retrieve(&key("never")).await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_retrieve_after_delete_is_not_found() {
        let gcs = provider(AccessControl::ObjectAcl);
        let k = key("docs/gone.txt");
        gcs.store_bytes(&k, b"short-lived".to_vec(), "text/plain", Permissions::Private)
            .await
            .unwrap();

        gcs.delete(&k).await.unwrap();

        let err = gcs.retrieve(&k).await.err().unwrap();
        assert!(err.is_not_found());
        assert!(gcs.client().object("docs/gone.txt").is_none());
    }

    #[tokio::test]
    async fn test_copy_conditions_destination() {
        let gcs = provider(AccessControl::ObjectAcl);
        gcs.client().external_write("src", b"payload");
        gcs.client().external_write("dst", b"old");

        gcs.copy(&key("src"), &key("dst")).await.unwrap();
        assert_eq!(gcs.client().object("dst").unwrap().data, b"payload");

        gcs.client().race.store(true, Ordering::SeqCst);
        let err = gcs.copy(&key("src"), &key("dst")).await.err().unwrap();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_copy_missing_source() {
        let gcs = provider(AccessControl::ObjectAcl);
        let err = gcs.copy(&key("ghost"), &key("dst")).await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_pages_and_filters_marker() {
        let gcs = GcsProvider::with_client(
            MemoryGcs::with_page_size(2),
            "assets",
            AccessControl::Uniform,
            None,
        );
        for name in ["a/", "a/1", "a/2", "a/3", "a/deep/x", "b"] {
            gcs.client().external_write(name, b"x");
        }

        assert_eq!(
            gcs.list(&key("a")).await.unwrap(),
            vec![key("a/1"), key("a/2"), key("a/3"), key("a/deep")]
        );
        assert_eq!(gcs.list_root().await.unwrap(), vec![key("a"), key("b")]);
    }

    #[tokio::test]
    async fn test_delete_prefix_exact_and_missing() {
        let gcs = provider(AccessControl::ObjectAcl);
        for name in ["tree", "tree/a", "tree/sub/b", "treehouse"] {
            gcs.client().external_write(name, b"x");
        }

        gcs.delete(&key("tree")).await.unwrap();
        assert!(gcs.client().object("tree").is_none());
        assert!(gcs.client().object("tree/sub/b").is_none());
        assert!(gcs.client().object("treehouse").is_some());

        gcs.delete(&key("tree")).await.unwrap();
        assert!(matches!(gcs.delete(&ObjectKey::root()).await, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_absolute_url() {
        let gcs = provider(AccessControl::ObjectAcl);
        assert!(matches!(gcs.absolute_url(&[]), Err(Error::InvalidInput(_))));
        assert!(matches!(gcs.absolute_url(&["a"]), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_config_deserialization() {
        let config: GcsConfig = serde_json::from_value(serde_json::json!({
            "project_id": "proj",
            "bucket": "assets",
            "uniform_bucket_level_access": true,
            "credentials": {"type": "anonymous"}
        }))
        .unwrap();

        assert!(config.uniform_bucket_level_access);
        assert!(config.cache_max_age.is_none());
        assert!(matches!(
            config.resolve_credentials().unwrap(),
            GcsCredentials::Anonymous
        ));
    }

    #[test]
    fn test_credentials_file_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adc.json");
        let adc = serde_json::json!({
            "type": "authorized_user",
            "client_id": "id",
            "client_secret": "s",
            "refresh_token": "r"
        });
        std::fs::write(&path, adc.to_string()).unwrap();

        let config: GcsConfig = serde_json::from_value(serde_json::json!({
            "project_id": "proj",
            "bucket": "assets",
            "credentials_file": path
        }))
        .unwrap();
        assert!(matches!(
            config.resolve_credentials().unwrap(),
            GcsCredentials::AuthorizedUser { .. }
        ));
        assert!(GcsProvider::new(config).is_ok());
    }

    #[test]
    fn test_credentials_source_must_be_unique() {
        let mut config: GcsConfig = serde_json::from_value(serde_json::json!({
            "project_id": "proj",
            "bucket": "assets"
        }))
        .unwrap();
        assert!(matches!(config.resolve_credentials(), Err(Error::InvalidInput(_))));

        config.credentials = Some(GcsCredentials::Anonymous);
        config.credentials_file = Some(PathBuf::from("/nonexistent/adc.json"));
        assert!(matches!(config.resolve_credentials(), Err(Error::InvalidInput(_))));
        assert!(GcsProvider::new(config).is_err());
    }

    #[test]
    fn test_new_builds_real_client() {
        let gcs = GcsProvider::new(GcsConfig {
            project_id: "proj".to_string(),
            bucket: "assets".to_string(),
            uniform_bucket_level_access: false,
            cache_max_age: Some(60),
            endpoint: Some("http://localhost:4443".to_string()),
            credentials: Some(GcsCredentials::Anonymous),
            credentials_file: None,
        })
        .unwrap();
        assert_eq!(gcs.name(), "gcs");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_round_trip_fidelity(
            parts in proptest::collection::vec("[a-z0-9_-]{1,10}", 1..4),
            data in proptest::collection::vec(any::<u8>(), 0..4096),
        ) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let gcs = provider(AccessControl::ObjectAcl);
            let k = ObjectKey::parse(&parts.join("/")).unwrap();

            let stored = runtime.block_on(async {
                gcs.store_bytes(&k, data.clone(), "binary/octet-stream", Permissions::Private)
                    .await
                    .unwrap();
                read_all(&gcs, &k).await
            });
            prop_assert_eq!(stored, data);
        }
    }
}
