use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::server::platform::{PlatformClient, PlatformError};

/// Registry credentials are refreshed after this long
pub const CREDENTIAL_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("docker credentials contain no entry for registry {host}")]
    MissingAuth { host: String },

    #[error("registry secret is not a base64 encoded user:password pair")]
    MalformedSecret,

    #[error("registry token endpoint returned no token")]
    EmptyToken,
}

/// Provider of bearer tokens scoped to a single repository
///
/// The registry proxy depends on this trait rather than on the concrete cache
/// so that the token source can be swapped out.
#[async_trait]
pub trait RepoTokenProvider: Send + Sync {
    /// Get a bearer token with push and pull scope for `repo_path`
    /// (e.g. "acme-images/blog")
    async fn repo_token(&self, repo_path: &str) -> Result<String, CredentialError>;
}

/// A registry basic-auth secret and when it was fetched
#[derive(Debug, Clone)]
pub struct CachedCredential {
    /// base64 of `user:password`
    pub secret: String,
    pub username: String,
    pub fetched_at: Instant,
}

impl CachedCredential {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() >= ttl
    }
}

/// Cache for the registry-wide docker credential
///
/// The credential is fetched from the platform with the operator's token and
/// kept for [`CREDENTIAL_TTL`]. Refreshes happen while holding the write lock,
/// so concurrent callers that find the cache empty wait for a single fetch.
/// Repository tokens are minted on every call and never stored.
pub struct CredentialCache {
    platform: PlatformClient,
    platform_token: String,
    registry_host: String,
    ttl: Duration,
    cached: RwLock<Option<CachedCredential>>,
}

impl CredentialCache {
    pub fn new(platform: PlatformClient, platform_token: String, registry_host: String) -> Self {
        Self {
            platform,
            platform_token,
            registry_host,
            ttl: CREDENTIAL_TTL,
            cached: RwLock::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Return the cached registry secret, fetching a new one if absent or expired
    pub async fn docker_credentials(&self) -> Result<String, CredentialError> {
        {
            let cached = self.cached.read().await;
            if let Some(credential) = cached.as_ref() {
                if !credential.is_expired(self.ttl) {
                    return Ok(credential.secret.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;

        // Another task may have refreshed while we waited for the lock
        if let Some(credential) = cached.as_ref() {
            if !credential.is_expired(self.ttl) {
                return Ok(credential.secret.clone());
            }
        }

        let credential = self.fetch_credential().await?;
        let secret = credential.secret.clone();
        *cached = Some(credential);
        Ok(secret)
    }

    /// Drop the cached credential so the next call fetches a fresh one
    pub async fn invalidate(&self) {
        let mut cached = self.cached.write().await;
        if cached.take().is_some() {
            tracing::info!(registry = %self.registry_host, "Invalidated cached registry credential");
        }
    }

    async fn fetch_credential(&self) -> Result<CachedCredential, CredentialError> {
        let config = self.platform.docker_credentials(&self.platform_token).await?;

        let secret = config
            .auths
            .get(&self.registry_host)
            .map(|entry| entry.auth.clone())
            .filter(|auth| !auth.is_empty())
            .ok_or_else(|| CredentialError::MissingAuth {
                host: self.registry_host.clone(),
            })?;

        let username = decode_username(&secret)?;

        tracing::info!(
            registry = %self.registry_host,
            username = %username,
            "Fetched registry credential"
        );

        Ok(CachedCredential {
            secret,
            username,
            fetched_at: Instant::now(),
        })
    }

    async fn exchange(&self, secret: &str, scope: &str) -> Result<String, PlatformError> {
        let token = self
            .platform
            .registry_token(secret, &self.registry_host, scope)
            .await?;
        Ok(token.into_token().unwrap_or_default())
    }
}

#[async_trait]
impl RepoTokenProvider for CredentialCache {
    async fn repo_token(&self, repo_path: &str) -> Result<String, CredentialError> {
        let scope = format!("repository:{}:push,pull", repo_path);
        let secret = self.docker_credentials().await?;

        let token = match self.exchange(&secret, &scope).await {
            Ok(token) => token,
            Err(e) if e.is_auth_failure() => {
                tracing::warn!(
                    repository = %repo_path,
                    "Registry rejected cached credential, refreshing and retrying once"
                );
                self.invalidate().await;
                let secret = self.docker_credentials().await?;
                self.exchange(&secret, &scope).await?
            }
            Err(e) => return Err(e.into()),
        };

        if token.is_empty() {
            return Err(CredentialError::EmptyToken);
        }

        tracing::debug!(repository = %repo_path, token_len = token.len(), "Minted repository token");
        Ok(token)
    }
}

/// Extract the username from a base64 `user:password` secret
fn decode_username(secret: &str) -> Result<String, CredentialError> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(secret.trim())
        .map_err(|_| CredentialError::MalformedSecret)?;
    let decoded = String::from_utf8(decoded).map_err(|_| CredentialError::MalformedSecret)?;

    match decoded.split_once(':') {
        Some((user, _)) if !user.is_empty() => Ok(user.to_string()),
        _ => Err(CredentialError::MalformedSecret),
    }
}
