use crate::server::domain::{create_dns_provider, DnsProvider};
use crate::server::platform::PlatformClient;
use crate::server::registry::{registry_host, CredentialCache, RegistryProxy, RepoTokenProvider};
use crate::server::settings::Settings;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Shared state for HTTP handlers and background jobs
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub platform: PlatformClient,
    pub registry_proxy: Arc<RegistryProxy>,
    pub dns_provider: Option<Arc<dyn DnsProvider>>,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self> {
        let platform = PlatformClient::new(
            &settings.platform.api_url,
            settings.platform.request_timeout(),
        )
        .context("Failed to create platform API client")?;

        let upstream = settings
            .registry
            .upstream_url()
            .context("Invalid upstream registry")?;

        let tokens: Option<Arc<dyn RepoTokenProvider>> = if settings.platform.token.is_empty() {
            tracing::warn!(
                "No platform token configured, registry requests are forwarded with client credentials"
            );
            None
        } else {
            Some(Arc::new(CredentialCache::new(
                platform.clone(),
                settings.platform.token.clone(),
                registry_host(&upstream),
            )))
        };

        let registry_proxy = Arc::new(RegistryProxy::new(
            upstream,
            settings.registry.namespace.clone(),
            tokens,
        )?);

        let dns_provider = create_dns_provider(&settings.dns)?;
        if dns_provider.is_some() {
            tracing::info!(zone = %settings.dns.zone, "DNS provider configured");
        }

        Ok(Self {
            settings: Arc::new(settings),
            platform,
            registry_proxy,
            dns_provider,
        })
    }
}
