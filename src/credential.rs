//! Bearer-token resolution for the Azure-backed creation paths
//!
//! Token acquisition is plain HTTP plus the `az` CLI. Credential construction
//! performs no I/O, so building a client stays synchronous and offline; the
//! first request triggers the actual token fetch, and `BearerTokenProvider`
//! caches the result until it nears expiry.

use crate::{Error, Result};
use serde::Deserialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Refresh window ahead of a cached token's expiry
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Assumed lifetime when a source does not report one
const DEFAULT_LIFETIME: Duration = Duration::from_secs(2700);

/// Timeout for token-endpoint requests
const TOKEN_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";

/// A bearer token plus its expiry instant
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// Raw bearer token value
    pub token: String,
    /// Instant after which the token must not be reused
    pub expires_at: Instant,
}

impl AccessToken {
    /// Token valid for the given lifetime from now
    pub fn new(token: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            token: token.into(),
            expires_at: Instant::now() + lifetime,
        }
    }

    fn fresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN < self.expires_at
    }
}

/// Source of bearer tokens for a given scope
#[async_trait::async_trait]
pub trait TokenCredential: Send + Sync {
    /// Acquire a token for the scope
    async fn get_token(&self, scope: &str) -> Result<AccessToken>;

    /// Short name used in chain diagnostics
    fn name(&self) -> &'static str;
}

fn token_http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(TOKEN_HTTP_TIMEOUT)
        .connect_timeout(Duration::from_secs(5))
        .build()?)
}

fn expiry_from_epoch(expires_on: Option<i64>) -> Instant {
    let lifetime = expires_on
        .and_then(|epoch| {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs() as i64;
            u64::try_from(epoch - now).ok()
        })
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_LIFETIME);
    Instant::now() + lifetime
}

/// Credential backed by `az account get-access-token`
#[derive(Debug, Clone, Copy, Default)]
pub struct AzureCliCredential;

#[derive(Deserialize)]
struct CliTokenPayload {
    #[serde(rename = "accessToken")]
    access_token: String,
    /// POSIX seconds; recent az releases emit it next to the local-time string
    #[serde(default)]
    expires_on: Option<i64>,
}

#[async_trait::async_trait]
impl TokenCredential for AzureCliCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let output = tokio::process::Command::new("az")
            .args(["account", "get-access-token", "--scope", scope, "--output", "json"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Credential(format!("failed to run az: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Credential(format!(
                "az account get-access-token failed: {}",
                stderr.trim()
            )));
        }

        let payload: CliTokenPayload = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Credential(format!("unexpected az output: {}", e)))?;

        Ok(AccessToken {
            token: payload.access_token,
            expires_at: expiry_from_epoch(payload.expires_on),
        })
    }

    fn name(&self) -> &'static str {
        "azure-cli"
    }
}

/// Client-credentials grant from `AZURE_TENANT_ID` / `AZURE_CLIENT_ID` /
/// `AZURE_CLIENT_SECRET`
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentCredential;

#[derive(Deserialize)]
struct OAuthTokenPayload {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| Error::Credential(format!("{} is not set", key)))
}

#[async_trait::async_trait]
impl TokenCredential for EnvironmentCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let tenant = env_var("AZURE_TENANT_ID")?;
        let client_id = env_var("AZURE_CLIENT_ID")?;
        let client_secret = env_var("AZURE_CLIENT_SECRET")?;

        let url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            tenant
        );
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("scope", scope),
        ];

        let response = token_http_client()?.post(&url).form(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Credential(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let payload: OAuthTokenPayload = serde_json::from_str(&body)
            .map_err(|e| Error::Credential(format!("unexpected token payload: {}", e)))?;

        Ok(AccessToken {
            token: payload.access_token,
            expires_at: Instant::now()
                + payload.expires_in.map(Duration::from_secs).unwrap_or(DEFAULT_LIFETIME),
        })
    }

    fn name(&self) -> &'static str {
        "environment"
    }
}

/// Managed-identity token from the instance metadata service
#[derive(Debug, Clone, Copy, Default)]
pub struct ManagedIdentityCredential;

#[derive(Deserialize)]
struct ImdsTokenPayload {
    access_token: String,
    /// IMDS reports numeric fields as strings
    #[serde(default)]
    expires_in: Option<String>,
}

#[async_trait::async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        // IMDS takes a resource rather than a scope.
        let resource = scope.trim_end_matches("/.default");

        let response = token_http_client()?
            .get(IMDS_ENDPOINT)
            .query(&[("api-version", IMDS_API_VERSION), ("resource", resource)])
            .header("Metadata", "true")
            .send()
            .await
            .map_err(|e| Error::Credential(format!("IMDS unreachable: {}", e)))?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Credential(format!(
                "IMDS returned {}: {}",
                status, body
            )));
        }

        let payload: ImdsTokenPayload = serde_json::from_str(&body)
            .map_err(|e| Error::Credential(format!("unexpected IMDS payload: {}", e)))?;

        let lifetime = payload
            .expires_in
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LIFETIME);

        Ok(AccessToken {
            token: payload.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }

    fn name(&self) -> &'static str {
        "managed-identity"
    }
}

/// Tries each source in order; the first token wins
pub struct ChainedTokenCredential {
    sources: Vec<Arc<dyn TokenCredential>>,
}

impl ChainedTokenCredential {
    /// Chain the given sources in order
    pub fn new(sources: Vec<Arc<dyn TokenCredential>>) -> Self {
        Self { sources }
    }
}

#[async_trait::async_trait]
impl TokenCredential for ChainedTokenCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let mut failures = Vec::new();
        for source in &self.sources {
            match source.get_token(scope).await {
                Ok(token) => {
                    tracing::debug!(source = source.name(), "token acquired");
                    return Ok(token);
                }
                Err(e) => failures.push(format!("{}: {}", source.name(), e)),
            }
        }
        Err(Error::Credential(format!(
            "no credential source produced a token ({})",
            failures.join("; ")
        )))
    }

    fn name(&self) -> &'static str {
        "chained"
    }
}

/// Builder for [`DefaultAzureCredential`]; switches drop individual sources
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAzureCredentialBuilder {
    exclude_environment_credential: bool,
    exclude_managed_identity_credential: bool,
    exclude_cli_credential: bool,
}

impl DefaultAzureCredentialBuilder {
    /// Start from the full source chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the environment-variable source
    pub fn exclude_environment_credential(mut self) -> Self {
        self.exclude_environment_credential = true;
        self
    }

    /// Drop the managed-identity source
    pub fn exclude_managed_identity_credential(mut self) -> Self {
        self.exclude_managed_identity_credential = true;
        self
    }

    /// Drop the az CLI source
    pub fn exclude_cli_credential(mut self) -> Self {
        self.exclude_cli_credential = true;
        self
    }

    /// Build the chained credential from the remaining sources
    pub fn build(self) -> DefaultAzureCredential {
        let mut sources: Vec<Arc<dyn TokenCredential>> = Vec::new();
        if !self.exclude_environment_credential {
            sources.push(Arc::new(EnvironmentCredential));
        }
        if !self.exclude_managed_identity_credential {
            sources.push(Arc::new(ManagedIdentityCredential));
        }
        if !self.exclude_cli_credential {
            sources.push(Arc::new(AzureCliCredential));
        }
        DefaultAzureCredential {
            chain: ChainedTokenCredential::new(sources),
        }
    }
}

/// Default source chain: environment, managed identity, then the az CLI
pub struct DefaultAzureCredential {
    chain: ChainedTokenCredential,
}

impl DefaultAzureCredential {
    /// Full source chain
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Builder with per-source exclusion switches
    pub fn builder() -> DefaultAzureCredentialBuilder {
        DefaultAzureCredentialBuilder::new()
    }

    #[cfg(test)]
    fn source_names(&self) -> Vec<&'static str> {
        self.chain.sources.iter().map(|s| s.name()).collect()
    }
}

impl Default for DefaultAzureCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TokenCredential for DefaultAzureCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        self.chain.get_token(scope).await
    }

    fn name(&self) -> &'static str {
        "default"
    }
}

/// Caching bearer-token provider bound to a scope.
///
/// Cloning shares the underlying cache, so every client handle reuses the
/// same token until it nears expiry.
#[derive(Clone)]
pub struct BearerTokenProvider {
    credential: Arc<dyn TokenCredential>,
    scope: String,
    cache: Arc<Mutex<Option<AccessToken>>>,
}

impl BearerTokenProvider {
    /// Bind a credential to a scope
    pub fn new(credential: Arc<dyn TokenCredential>, scope: impl Into<String>) -> Self {
        Self {
            credential,
            scope: scope.into(),
            cache: Arc::new(Mutex::new(None)),
        }
    }

    /// Scope tokens are requested for
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Current bearer token, refreshed when the cached one nears expiry
    pub async fn token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.as_ref() {
            if token.fresh() {
                return Ok(token.token.clone());
            }
        }
        let token = self.credential.get_token(&self.scope).await?;
        let value = token.token.clone();
        *cache = Some(token);
        Ok(value)
    }
}

impl std::fmt::Debug for BearerTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerTokenProvider")
            .field("credential", &self.credential.name())
            .field("scope", &self.scope)
            .finish()
    }
}
