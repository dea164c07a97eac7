//! Credentials and access-token management for Google Cloud Storage.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

use omnistore_common::{Error, Result, SecretString};

/// OAuth2 token endpoint.
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Credentials accepted by the GCS provider.
///
/// The `authorized_user` variant has the same shape as the application
/// default credentials file written by `gcloud auth application-default login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GcsCredentials {
    /// No credentials, for emulators and public buckets.
    Anonymous,
    /// A bearer token obtained elsewhere.
    AccessToken { token: SecretString },
    /// OAuth2 client plus refresh token.
    AuthorizedUser {
        client_id: String,
        client_secret: SecretString,
        refresh_token: SecretString,
    },
}

impl GcsCredentials {
    /// Load credentials from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::InvalidInput(format!(
                "Invalid credentials file {}: {}",
                path.display(),
                e
            ))
        })
    }
}

/// OAuth2 access token with expiration tracking.
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct Tokens {
    /// Access token for API requests.
    pub access_token: String,
    /// When the access token expires.
    #[zeroize(skip)]
    pub expires_at: DateTime<Utc>,
}

impl Tokens {
    /// Check if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        // Consider expired if less than 5 minutes remaining
        self.expires_at < Utc::now() + Duration::minutes(5)
    }
}

/// Source of bearer tokens for API requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A valid access token, or `None` to send requests unauthenticated.
    async fn access_token(&self) -> Result<Option<String>>;
}

/// Unauthenticated access.
pub struct Anonymous;

#[async_trait]
impl TokenProvider for Anonymous {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// A fixed bearer token; never refreshed.
pub struct StaticToken(SecretString);

impl StaticToken {
    /// Wrap a bearer token.
    pub fn new(token: SecretString) -> Self {
        Self(token)
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(Some(self.0.expose().to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Token manager that exchanges a refresh token and caches the result.
pub struct TokenManager {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    refresh_token: SecretString,
    tokens: tokio::sync::RwLock<Option<Tokens>>,
}

impl TokenManager {
    /// Create a token manager; the first request triggers a refresh.
    pub fn new(
        http: Client,
        client_id: String,
        client_secret: SecretString,
        refresh_token: SecretString,
    ) -> Self {
        Self {
            http,
            token_url: GOOGLE_TOKEN_URL.to_string(),
            client_id,
            client_secret,
            refresh_token,
            tokens: tokio::sync::RwLock::new(None),
        }
    }

    /// Get a valid access token, refreshing if necessary.
    ///
    /// # Errors
    /// - Token refresh failed
    pub async fn get_access_token(&self) -> Result<String> {
        {
            let tokens = self.tokens.read().await;
            if let Some(tokens) = tokens.as_ref().filter(|t| !t.is_expired()) {
                return Ok(tokens.access_token.clone());
            }
        }

        let mut tokens = self.tokens.write().await;

        // Double-check after acquiring write lock
        if let Some(current) = tokens.as_ref().filter(|t| !t.is_expired()) {
            return Ok(current.access_token.clone());
        }

        tracing::info!("Refreshing expired access token");
        let fresh = self.refresh().await?;
        let access_token = fresh.access_token.clone();
        *tokens = Some(fresh);

        Ok(access_token)
    }

    async fn refresh(&self) -> Result<Tokens> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose()),
                ("refresh_token", self.refresh_token.expose()),
            ])
            .send()
            .await
            .map_err(|e| Error::Authentication(format!("Token refresh failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Authentication(format!(
                "Token refresh failed: {} - {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Authentication(format!("Malformed token response: {}", e)))?;

        let expires_in = Duration::seconds(token.expires_in.unwrap_or(3600));

        Ok(Tokens {
            access_token: token.access_token,
            expires_at: Utc::now() + expires_in,
        })
    }
}

#[async_trait]
impl TokenProvider for TokenManager {
    async fn access_token(&self) -> Result<Option<String>> {
        self.get_access_token().await.map(Some)
    }
}

/// Build the token provider matching a set of credentials.
pub fn token_provider(credentials: &GcsCredentials, http: Client) -> Arc<dyn TokenProvider> {
    match credentials {
        GcsCredentials::Anonymous => Arc::new(Anonymous),
        GcsCredentials::AccessToken { token } => Arc::new(StaticToken::new(token.clone())),
        GcsCredentials::AuthorizedUser {
            client_id,
            client_secret,
            refresh_token,
        } => Arc::new(TokenManager::new(
            http,
            client_id.clone(),
            client_secret.clone(),
            refresh_token.clone(),
        )),
    }
}
