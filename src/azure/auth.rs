//! Azure Authentication
//!
//! Acquires Azure Resource Manager access tokens from a service principal,
//! the App Service / Functions managed identity endpoint, or a pre-issued
//! token, and caches them until shortly before they expire.

use super::http::AzureHttpClient;
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Resource the tokens are requested for
pub const ARM_RESOURCE: &str = "https://management.azure.com/";

/// Default AAD authority
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// API version of the App Service managed identity endpoint
const MANAGED_IDENTITY_API_VERSION: &str = "2019-08-01";

/// Token expiry buffer - refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default token TTL if the response carries no expiry (conservative: 30 minutes)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Where access tokens come from
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// A token issued out of band, e.g. by `az account get-access-token`
    Static { token: String },
    /// OAuth2 client credentials flow
    ClientSecret {
        authority_host: String,
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    /// App Service / Functions managed identity
    ManagedIdentity {
        endpoint: String,
        header: String,
        client_id: Option<String>,
    },
}

impl CredentialSource {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Static { .. } => "static token",
            Self::ClientSecret { .. } => "service principal",
            Self::ManagedIdentity { .. } => "managed identity",
        }
    }
}

// Secrets stay out of debug output.
impl std::fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static { .. } => f.write_str("Static"),
            Self::ClientSecret {
                tenant_id,
                client_id,
                ..
            } => f
                .debug_struct("ClientSecret")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            Self::ManagedIdentity { client_id, .. } => f
                .debug_struct("ManagedIdentity")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

/// Azure credentials holder with token caching
#[derive(Clone)]
pub struct AzureCredentials {
    source: Arc<CredentialSource>,
    http: AzureHttpClient,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

impl AzureCredentials {
    pub fn new(source: CredentialSource, http: AzureHttpClient) -> Self {
        tracing::info!("Using {} credentials", source.kind());
        Self {
            source: Arc::new(source),
            http,
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Get an access token for ARM calls
    /// Security: Checks token expiry before returning cached token
    pub async fn get_token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let (token, ttl) = self.fetch_token().await?;
        let expires_at = Instant::now() + ttl.saturating_sub(TOKEN_EXPIRY_BUFFER);

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                token: token.clone(),
                expires_at,
            });
        }

        tracing::debug!(
            "New token cached, expires in ~{} minutes",
            ttl.saturating_sub(TOKEN_EXPIRY_BUFFER).as_secs() / 60
        );

        Ok(token)
    }

    async fn fetch_token(&self) -> Result<(String, Duration)> {
        match self.source.as_ref() {
            CredentialSource::Static { token } => Ok((token.clone(), DEFAULT_TOKEN_TTL)),
            CredentialSource::ClientSecret {
                authority_host,
                tenant_id,
                client_id,
                client_secret,
            } => {
                let url = format!(
                    "{}/{}/oauth2/v2.0/token",
                    authority_host.trim_end_matches('/'),
                    tenant_id
                );
                let scope = format!("{}.default", ARM_RESOURCE);
                let request = self.http.inner().post(&url).form(&[
                    ("grant_type", "client_credentials"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("scope", scope.as_str()),
                ]);
                let body = self
                    .http
                    .send_json(request)
                    .await
                    .context("Failed to acquire service principal token")?;
                parse_token_response(&body)
            }
            CredentialSource::ManagedIdentity {
                endpoint,
                header,
                client_id,
            } => {
                let mut query = vec![
                    ("resource", ARM_RESOURCE),
                    ("api-version", MANAGED_IDENTITY_API_VERSION),
                ];
                if let Some(client_id) = client_id {
                    query.push(("client_id", client_id.as_str()));
                }
                let request = self
                    .http
                    .inner()
                    .get(endpoint)
                    .header("X-IDENTITY-HEADER", header)
                    .query(&query);
                let body = self
                    .http
                    .send_json(request)
                    .await
                    .context("Failed to acquire managed identity token")?;
                parse_token_response(&body)
            }
        }
    }
}

/// Extract the token and its lifetime from an AAD or managed identity response
fn parse_token_response(body: &Value) -> Result<(String, Duration)> {
    let token = body
        .get("access_token")
        .and_then(Value::as_str)
        .context("Token response has no access_token")?
        .to_string();

    let ttl = number_field(body, "expires_in")
        .map(Duration::from_secs)
        .or_else(|| {
            number_field(body, "expires_on").map(|epoch| {
                let now = chrono::Utc::now().timestamp().max(0) as u64;
                Duration::from_secs(epoch.saturating_sub(now))
            })
        })
        .unwrap_or(DEFAULT_TOKEN_TTL);

    Ok((token, ttl))
}

/// Token endpoints disagree on whether numbers are JSON numbers or strings
fn number_field(body: &Value, key: &str) -> Option<u64> {
    match body.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
