//! Google Cloud Storage JSON API client.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio_util::io::{ReaderStream, StreamReader};

use omnistore_common::{Error, Permissions, Result};

use super::auth::TokenProvider;
use crate::provider::ObjectReader;

/// Google Cloud Storage API base URL.
pub const GCS_API_BASE: &str = "https://storage.googleapis.com";

/// Multipart boundary for uploads carrying metadata and media.
const BOUNDARY: &str = "omnistore_multipart_boundary";

/// Object names are encoded as a single path segment.
const OBJECT_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Object metadata returned by the JSON API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcsObject {
    /// Object name.
    pub name: String,
    /// Content generation, bumped on every overwrite.
    #[serde(deserialize_with = "int64_string")]
    pub generation: i64,
    /// Content type.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Cache-Control metadata.
    #[serde(default)]
    pub cache_control: Option<String>,
}

/// The API encodes 64-bit integers as JSON strings.
fn int64_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        Raw::Number(n) => Ok(n),
    }
}

/// Condition a write places on the current state of its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The destination must still be at this generation.
    GenerationMatch(i64),
    /// The destination must not exist yet.
    DoesNotExist,
}

impl Precondition {
    /// Value of the `ifGenerationMatch` query parameter; `0` means absent.
    pub fn if_generation_match(&self) -> i64 {
        match self {
            Precondition::GenerationMatch(generation) => *generation,
            Precondition::DoesNotExist => 0,
        }
    }
}

/// A single object upload.
#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    /// Destination object name.
    pub name: &'a str,
    /// Local file holding the complete body.
    pub body: &'a Path,
    /// Content type stored with the object.
    pub content_type: &'a str,
    /// Cache-Control stored with the object.
    pub cache_control: Option<&'a str>,
    /// Write condition.
    pub precondition: Precondition,
    /// Predefined ACL; omitted entirely on uniform-access buckets.
    pub acl: Option<Permissions>,
}

/// One page of a bucket listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Object names on this page.
    pub names: Vec<String>,
    /// Prefixes (with trailing delimiter) on this page.
    pub prefixes: Vec<String>,
    /// Token for the next page.
    pub next_page_token: Option<String>,
}

/// Operations the GCS provider needs from the substrate.
#[async_trait]
pub trait GcsApi: Send + Sync {
    /// Object metadata, or `None` if absent.
    async fn get_object(&self, name: &str) -> Result<Option<GcsObject>>;

    /// Conditionally upload a whole object.
    ///
    /// # Errors
    /// - `Conflict` if the precondition no longer holds
    async fn upload(&self, request: UploadRequest<'_>) -> Result<GcsObject>;

    /// Open an object's media for reading.
    async fn download(&self, name: &str) -> Result<ObjectReader>;

    /// Fetch one page of names under `prefix`.
    async fn list(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        page_token: Option<String>,
    ) -> Result<ObjectPage>;

    /// Server-side copy with a condition on the destination.
    async fn copy(
        &self,
        source: &str,
        target: &str,
        precondition: Precondition,
    ) -> Result<GcsObject>;

    /// Delete one object.
    async fn delete(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadMetadata<'a> {
    name: &'a str,
    content_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<GcsObject>,
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RewriteResponse {
    done: bool,
    #[serde(default)]
    rewrite_token: Option<String>,
    #[serde(default)]
    resource: Option<GcsObject>,
}

fn predefined_acl(permissions: Permissions) -> &'static str {
    match permissions {
        Permissions::PublicRead => "publicRead",
        Permissions::Private => "private",
    }
}

fn encode(name: &str) -> String {
    utf8_percent_encode(name, OBJECT_NAME).to_string()
}

/// [`GcsApi`] over the JSON API with `reqwest`.
pub struct GcsClient {
    http: Client,
    base: String,
    bucket: String,
    token_provider: Arc<dyn TokenProvider>,
}

impl GcsClient {
    /// Create a client for one bucket.
    ///
    /// `base` overrides [`GCS_API_BASE`], e.g. for an emulator.
    pub fn new(
        http: Client,
        base: Option<&str>,
        bucket: impl Into<String>,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            http,
            base: base.unwrap_or(GCS_API_BASE).trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            token_provider,
        }
    }

    fn objects_url(&self) -> String {
        format!("{}/storage/v1/b/{}/o", self.base, encode(&self.bucket))
    }

    fn object_url(&self, name: &str) -> String {
        format!("{}/{}", self.objects_url(), encode(name))
    }

    /// Attach the bearer token, if the credentials provide one.
    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(match self.token_provider.access_token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    async fn send(&self, request: RequestBuilder, action: &str, name: &str) -> Result<Response> {
        self.authorize(request)
            .await?
            .send()
            .await
            .map_err(|e| {
                Error::Storage(format!(
                    "Unable to {} {} on GCS bucket {}: {}",
                    action, name, self.bucket, e
                ))
            })
    }

    /// Map a non-success status onto the error taxonomy.
    async fn status_error(&self, response: Response, action: &str, name: &str) -> Error {
        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => Error::NotFound(format!(
                "Key {} not found in GCS bucket {}",
                name, self.bucket
            )),
            StatusCode::PRECONDITION_FAILED => Error::Conflict(format!(
                "Precondition failed to {} {} in GCS bucket {}",
                action, name, self.bucket
            )),
            StatusCode::UNAUTHORIZED => Error::Authentication(format!(
                "Invalid or expired token to {} {} in GCS bucket {}",
                action, name, self.bucket
            )),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Error::Storage(format!(
                    "Unable to {} {} on GCS bucket {}: {} - {}",
                    action, name, self.bucket, status, body
                ))
            }
        }
    }

    /// Handle API response with error checking.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: Response,
        action: &str,
        name: &str,
    ) -> Result<T> {
        if !response.status().is_success() {
            return Err(self.status_error(response, action, name).await);
        }

        response.json().await.map_err(|e| {
            Error::Storage(format!(
                "Failed to parse response to {} {}: {}",
                action, name, e
            ))
        })
    }
}

#[async_trait]
impl GcsApi for GcsClient {
    async fn get_object(&self, name: &str) -> Result<Option<GcsObject>> {
        let request = self.http.get(self.object_url(name));
        let response = self.send(request, "inspect", name).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.handle_response(response, "inspect", name).await.map(Some)
    }

    async fn upload(&self, request: UploadRequest<'_>) -> Result<GcsObject> {
        let body_fault = |e: std::io::Error| {
            Error::Storage(format!(
                "Unable to store {} on GCS bucket {}: cannot read {}: {}",
                request.name,
                self.bucket,
                request.body.display(),
                e
            ))
        };
        let file = tokio::fs::File::open(request.body)
            .await
            .map_err(body_fault)?;
        let media_len = file.metadata().await.map_err(body_fault)?.len();

        let metadata = serde_json::to_string(&UploadMetadata {
            name: request.name,
            content_type: request.content_type,
            cache_control: request.cache_control,
        })
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize metadata: {}", e)))?;

        // Metadata part, then the media part streamed from disk
        let head = format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n\
             --{b}\r\nContent-Type: {ct}\r\n\r\n",
            b = BOUNDARY,
            m = metadata,
            ct = request.content_type
        );
        let tail = format!("\r\n--{}--\r\n", BOUNDARY);
        let total = head.len() as u64 + media_len + tail.len() as u64;

        let body = stream::once(async move { Ok::<Bytes, std::io::Error>(Bytes::from(head)) })
            .chain(ReaderStream::new(file))
            .chain(stream::once(async move { Ok(Bytes::from(tail)) }));

        let mut query = vec![
            ("uploadType", "multipart".to_string()),
            (
                "ifGenerationMatch",
                request.precondition.if_generation_match().to_string(),
            ),
        ];
        if let Some(acl) = request.acl {
            query.push(("predefinedAcl", predefined_acl(acl).to_string()));
        }

        let http_request = self
            .http
            .post(format!("{}/upload/storage/v1/b/{}/o", self.base, encode(&self.bucket)))
            .query(&query)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", BOUNDARY),
            )
            .header(header::CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(body));

        let response = self.send(http_request, "store", request.name).await?;
        self.handle_response(response, "store", request.name).await
    }

    async fn download(&self, name: &str) -> Result<ObjectReader> {
        let request = self.http.get(self.object_url(name)).query(&[("alt", "media")]);
        let response = self.send(request, "retrieve", name).await?;

        if !response.status().is_success() {
            return Err(self.status_error(response, "retrieve", name).await);
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        Ok(Box::pin(StreamReader::new(stream)))
    }

    async fn list(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        page_token: Option<String>,
    ) -> Result<ObjectPage> {
        let mut request = self.http.get(self.objects_url()).query(&[("prefix", prefix)]);
        if let Some(delimiter) = delimiter {
            request = request.query(&[("delimiter", delimiter)]);
        }
        if let Some(token) = &page_token {
            request = request.query(&[("pageToken", token.as_str())]);
        }

        let response = self.send(request, "list", prefix).await?;
        let page: ListResponse = self.handle_response(response, "list", prefix).await?;

        Ok(ObjectPage {
            names: page.items.into_iter().map(|o| o.name).collect(),
            prefixes: page.prefixes,
            next_page_token: page.next_page_token,
        })
    }

    async fn copy(
        &self,
        source: &str,
        target: &str,
        precondition: Precondition,
    ) -> Result<GcsObject> {
        let url = format!(
            "{}/rewriteTo/b/{}/o/{}",
            self.object_url(source),
            encode(&self.bucket),
            encode(target)
        );
        let generation = precondition.if_generation_match().to_string();
        let mut rewrite_token: Option<String> = None;

        // Large objects are rewritten over several calls
        loop {
            let mut request = self
                .http
                .post(&url)
                .query(&[("ifGenerationMatch", generation.as_str())])
                .json(&serde_json::json!({}));
            if let Some(token) = &rewrite_token {
                request = request.query(&[("rewriteToken", token.as_str())]);
            }

            let response = self.send(request, "copy", source).await?;
            let rewrite: RewriteResponse = self.handle_response(response, "copy", source).await?;

            if rewrite.done {
                return rewrite.resource.ok_or_else(|| {
                    Error::Storage(format!("Copy of {} finished without a resource", source))
                });
            }
            rewrite_token = Some(rewrite.rewrite_token.ok_or_else(|| {
                Error::Storage(format!("Copy of {} stalled without a rewrite token", source))
            })?);
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let request = self.http.delete(self.object_url(name));
        let response = self.send(request, "delete", name).await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.status_error(response, "delete", name).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcs::auth::Anonymous;

    #[test]
    fn test_object_generation_parses_from_string() {
        let object: GcsObject = serde_json::from_str(
            r#"{"name": "a/b.txt", "generation": "1700000000123456", "contentType": "text/plain"}"#,
        )
        .unwrap();

        assert_eq!(object.name, "a/b.txt");
        assert_eq!(object.generation, 1_700_000_000_123_456);
        assert_eq!(object.content_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_precondition_query_value() {
        assert_eq!(Precondition::DoesNotExist.if_generation_match(), 0);
        assert_eq!(Precondition::GenerationMatch(42).if_generation_match(), 42);
    }

    #[test]
    fn test_object_url_encodes_separators() {
        let client = GcsClient::new(Client::new(), None, "my-bucket", Arc::new(Anonymous));
        assert_eq!(
            client.object_url("dir/file name.txt"),
            "https://storage.googleapis.com/storage/v1/b/my-bucket/o/dir%2Ffile%20name.txt"
        );

        let emulator = GcsClient::new(
            Client::new(),
            Some("http://localhost:4443/"),
            "b",
            Arc::new(Anonymous),
        );
        assert_eq!(emulator.objects_url(), "http://localhost:4443/storage/v1/b/b/o");
    }

    #[test]
    fn test_upload_metadata_omits_missing_cache_control() {
        let json = serde_json::to_value(UploadMetadata {
            name: "a",
            content_type: "text/plain",
            cache_control: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"name": "a", "contentType": "text/plain"}));
    }

    #[test]
    fn test_rewrite_response_in_progress() {
        let rewrite: RewriteResponse = serde_json::from_str(
            r#"{"done": false, "rewriteToken": "tok", "totalBytesRewritten": "10"}"#,
        )
        .unwrap();
        assert!(!rewrite.done);
        assert_eq!(rewrite.rewrite_token.as_deref(), Some("tok"));
        assert!(rewrite.resource.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_body_names_object_and_bucket() {
        let client = GcsClient::new(Client::new(), None, "assets", Arc::new(Anonymous));
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.tmp");

        let err = client
            .upload(UploadRequest {
                name: "docs/a.txt",
                body: &missing,
                content_type: "text/plain",
                cache_control: None,
                precondition: Precondition::DoesNotExist,
                acl: None,
            })
            .await
            .err()
            .unwrap();

        match err {
            Error::Storage(message) => {
                assert!(message.contains("docs/a.txt"));
                assert!(message.contains("assets"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
