use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;

use super::models::{fqdn, normalize_target, CloudflareResponse, CnameOutcome, DnsRecord, Zone};
use crate::server::settings::DnsSettings;

/// DNS provider trait for keeping site hostnames pointed at their ingress
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Create or update a CNAME record so that `name` resolves to `target`
    ///
    /// # Arguments
    /// * `name` - Record name, either relative to the managed zone ("blog") or fully qualified
    /// * `target` - Hostname or URL the record should point to
    async fn ensure_cname(&self, name: &str, target: &str) -> Result<CnameOutcome>;

    /// The managed zone (e.g. "example.com")
    fn zone(&self) -> &str;
}

/// Cloudflare DNS provider implementation
pub struct CloudflareDnsProvider {
    http: reqwest::Client,
    api_url: String,
    api_token: String,
    zone_name: String,
    zone_id: OnceCell<String>,
}

impl CloudflareDnsProvider {
    pub fn new(api_url: &str, api_token: String, zone_name: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build Cloudflare HTTP client")?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_token,
            zone_name,
            zone_id: OnceCell::new(),
        })
    }

    /// Unwrap the `{success, errors, result}` envelope
    async fn parse<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read Cloudflare {} response", what))?;

        let envelope: CloudflareResponse<T> = serde_json::from_str(&body).with_context(|| {
            format!("Failed to parse Cloudflare {} response ({})", what, status)
        })?;

        if !envelope.success {
            return Err(match envelope.errors.first() {
                Some(e) => anyhow!("Cloudflare error {}: {}", e.code, e.message),
                None => anyhow!("Cloudflare API call failed ({})", status),
            });
        }

        envelope
            .result
            .ok_or_else(|| anyhow!("Cloudflare {} response has no result", what))
    }

    /// Zone ID for the managed zone, looked up once per process
    async fn zone_id(&self) -> Result<&str> {
        let id = self
            .zone_id
            .get_or_try_init(|| async {
                let response = self
                    .http
                    .get(format!("{}/zones", self.api_url))
                    .bearer_auth(&self.api_token)
                    .query(&[("name", self.zone_name.as_str())])
                    .send()
                    .await
                    .context("Failed to look up Cloudflare zone")?;

                let zones: Vec<Zone> = Self::parse(response, "zone").await?;
                let zone = zones
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("Zone {} not found", self.zone_name))?;

                tracing::info!(zone = %self.zone_name, zone_id = %zone.id, "Resolved Cloudflare zone");
                Ok::<_, anyhow::Error>(zone.id)
            })
            .await?;
        Ok(id.as_str())
    }

    async fn find_cname(&self, zone_id: &str, name: &str) -> Result<Option<DnsRecord>> {
        let response = self
            .http
            .get(format!("{}/zones/{}/dns_records", self.api_url, zone_id))
            .bearer_auth(&self.api_token)
            .query(&[("type", "CNAME"), ("name", name)])
            .send()
            .await
            .context("Failed to list DNS records")?;

        let records: Vec<DnsRecord> = Self::parse(response, "DNS record list").await?;
        Ok(records.into_iter().next())
    }
}

#[async_trait]
impl DnsProvider for CloudflareDnsProvider {
    async fn ensure_cname(&self, name: &str, target: &str) -> Result<CnameOutcome> {
        let name = fqdn(name, &self.zone_name);
        let target = normalize_target(target);
        if target.is_empty() {
            bail!("Empty CNAME target for {}", name);
        }

        let zone_id = self.zone_id().await?;
        let record = DnsRecord::cname(&name, &target);

        let (request, outcome) = match self.find_cname(zone_id, &name).await? {
            Some(existing) if existing.content == target => {
                tracing::debug!(record = %name, target = %target, "DNS record already correct");
                return Ok(CnameOutcome::Unchanged);
            }
            Some(existing) => {
                tracing::info!(
                    record = %name,
                    from = %existing.content,
                    to = %target,
                    "Updating DNS record"
                );
                let url = format!(
                    "{}/zones/{}/dns_records/{}",
                    self.api_url, zone_id, existing.id
                );
                (self.http.put(url), CnameOutcome::Updated)
            }
            None => {
                tracing::info!(record = %name, target = %target, "Creating DNS record");
                let url = format!("{}/zones/{}/dns_records", self.api_url, zone_id);
                (self.http.post(url), CnameOutcome::Created)
            }
        };

        let response = request
            .bearer_auth(&self.api_token)
            .json(&record)
            .send()
            .await
            .with_context(|| format!("Failed to write DNS record {}", name))?;
        let _: DnsRecord = Self::parse(response, "DNS record").await?;

        Ok(outcome)
    }

    fn zone(&self) -> &str {
        &self.zone_name
    }
}

/// Create a DNS provider when a token is configured
pub fn create_dns_provider(settings: &DnsSettings) -> Result<Option<Arc<dyn DnsProvider>>> {
    if settings.token.is_empty() {
        return Ok(None);
    }
    let provider = CloudflareDnsProvider::new(
        &settings.api_url,
        settings.token.clone(),
        settings.zone.clone(),
    )?;
    Ok(Some(Arc::new(provider)))
}
