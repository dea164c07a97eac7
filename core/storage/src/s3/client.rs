//! Amazon S3 API client.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectCannedAcl, ObjectIdentifier};
use aws_sdk_s3::Client;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::Path;
use tracing::error;

use omnistore_common::{Error, Permissions, Result};

use super::provider::S3Config;
use crate::provider::ObjectReader;

/// Characters left verbatim in the `x-amz-copy-source` header.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A single object upload.
#[derive(Debug, Clone)]
pub struct PutRequest<'a> {
    /// Destination key.
    pub key: &'a str,
    /// Local file holding the complete body.
    pub body: &'a Path,
    /// Content-Type header.
    pub content_type: &'a str,
    /// Cache-Control header.
    pub cache_control: &'a str,
    /// Canned ACL, absent under bucket-level access control.
    pub acl: Option<Permissions>,
}

/// One page of a bucket listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Object keys on this page.
    pub keys: Vec<String>,
    /// Common prefixes (with trailing delimiter) on this page.
    pub common_prefixes: Vec<String>,
    /// Token for the next page, if the listing is truncated.
    pub next_token: Option<String>,
}

/// Operations the S3 provider needs from the substrate.
///
/// Implementations translate the substrate's "no such key" signal into
/// [`Error::NotFound`]; everything else is [`Error::Storage`].
#[async_trait]
pub trait S3Api: Send + Sync {
    /// Upload a whole object.
    async fn put_object(&self, request: PutRequest<'_>) -> Result<()>;

    /// Open an object body for reading.
    async fn get_object(&self, key: &str) -> Result<ObjectReader>;

    /// Fetch one page of keys under `prefix`.
    async fn list_objects(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
    ) -> Result<ListPage>;

    /// Server-side copy within the bucket.
    async fn copy_object(&self, source: &str, target: &str) -> Result<()>;

    /// Delete up to 1000 keys in one request.
    async fn delete_objects(&self, keys: &[String]) -> Result<()>;

    /// Replace an object's ACL with a canned one.
    async fn put_object_acl(&self, key: &str, acl: Permissions) -> Result<()>;
}

/// [`S3Api`] backed by the AWS SDK.
pub struct AwsS3Client {
    client: Client,
    bucket: String,
}

impl AwsS3Client {
    /// Build an SDK client from static credentials.
    pub fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.expose(),
            None,
            None,
            "omnistore",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }

    /// Translate an SDK failure, keeping the not-found signal distinct.
    fn translate<E, R>(&self, action: &str, key: &str, err: SdkError<E, R>) -> Error
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        if is_no_such_key(&err) {
            return Error::NotFound(format!("Key {} not found in S3 bucket {}", key, self.bucket));
        }

        error!(
            bucket = %self.bucket,
            key,
            error = %DisplayErrorContext(&err),
            "Unable to {}",
            action
        );
        Error::Storage(format!(
            "Unable to {} {} on S3 bucket {}: {}",
            action,
            key,
            self.bucket,
            DisplayErrorContext(&err)
        ))
    }
}

fn is_no_such_key<E: ProvideErrorMetadata, R>(err: &SdkError<E, R>) -> bool {
    err.as_service_error()
        .and_then(|e| e.code())
        .map(|code| matches!(code, "NoSuchKey" | "NotFound"))
        .unwrap_or(false)
}

fn canned_acl(permissions: Permissions) -> ObjectCannedAcl {
    match permissions {
        Permissions::PublicRead => ObjectCannedAcl::PublicRead,
        Permissions::Private => ObjectCannedAcl::Private,
    }
}

#[async_trait]
impl S3Api for AwsS3Client {
    async fn put_object(&self, request: PutRequest<'_>) -> Result<()> {
        let body = ByteStream::from_path(request.body).await.map_err(|e| {
            Error::Storage(format!(
                "Unable to read {} for upload: {}",
                request.body.display(),
                e
            ))
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(request.key)
            .body(body)
            .content_type(request.content_type)
            .cache_control(request.cache_control)
            .set_acl(request.acl.map(canned_acl))
            .send()
            .await
            .map_err(|e| self.translate("store", request.key, e))?;

        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<ObjectReader> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.translate("retrieve", key, e))?;

        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn list_objects(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
    ) -> Result<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_delimiter(delimiter.map(String::from))
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| self.translate("list", prefix, e))?;

        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(String::from)
        } else {
            None
        };

        Ok(ListPage {
            keys: output
                .contents()
                .iter()
                .filter_map(|o| o.key().map(String::from))
                .collect(),
            common_prefixes: output
                .common_prefixes()
                .iter()
                .filter_map(|p| p.prefix().map(String::from))
                .collect(),
            next_token,
        })
    }

    async fn copy_object(&self, source: &str, target: &str) -> Result<()> {
        let copy_source = format!(
            "{}/{}",
            self.bucket,
            utf8_percent_encode(source, COPY_SOURCE)
        );

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(copy_source)
            .key(target)
            .send()
            .await
            .map_err(|e| self.translate("copy", source, e))?;

        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidInput(format!("Invalid delete request: {}", e)))?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| Error::InvalidInput(format!("Invalid delete request: {}", e)))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| self.translate("delete", &format!("{} keys", keys.len()), e))?;

        let failures: Vec<String> = output
            .errors()
            .iter()
            .map(|e| {
                format!(
                    "{}: {}",
                    e.key().unwrap_or("?"),
                    e.message().or(e.code()).unwrap_or("unknown error")
                )
            })
            .collect();

        if !failures.is_empty() {
            error!(bucket = %self.bucket, failed = failures.len(), "Batch delete partially failed");
            return Err(Error::Storage(format!(
                "Unable to delete from S3 bucket {}: {}",
                self.bucket,
                failures.join(", ")
            )));
        }

        Ok(())
    }

    async fn put_object_acl(&self, key: &str, acl: Permissions) -> Result<()> {
        self.client
            .put_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .acl(canned_acl(acl))
            .send()
            .await
            .map_err(|e| self.translate("change ACL of", key, e))?;

        Ok(())
    }
}
