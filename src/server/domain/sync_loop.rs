use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

use super::dns_provider::DnsProvider;
use super::models::CnameOutcome;
use crate::server::platform::models::App;
use crate::server::platform::PlatformClient;

/// Counts from one synchronization pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub checked: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Apps that need a CNAME: those with an ingress, optionally only the ones
/// created after `cutoff`
pub fn apps_to_sync(apps: &[App], cutoff: Option<DateTime<Utc>>) -> Vec<(&str, &str)> {
    apps.iter()
        .filter(|app| match cutoff {
            Some(cutoff) => app.created_at.is_some_and(|created| created > cutoff),
            None => true,
        })
        .filter_map(|app| {
            let ingress = app.ingress_host()?;
            if app.name().is_empty() {
                return None;
            }
            Some((app.name(), ingress))
        })
        .collect()
}

/// DNS sync loop - keeps a CNAME for every site pointed at its ingress
///
/// Every app is checked once at startup. After that only recently created
/// apps are checked, since their ingress shows up some time after creation.
pub struct DnsSyncLoop {
    platform: PlatformClient,
    token: String,
    provider: Arc<dyn DnsProvider>,
    interval: Duration,
    recent_window: Duration,
}

impl DnsSyncLoop {
    pub fn new(platform: PlatformClient, token: String, provider: Arc<dyn DnsProvider>) -> Self {
        Self {
            platform,
            token,
            provider,
            interval: Duration::from_secs(60),
            recent_window: Duration::from_secs(10 * 60),
        }
    }

    pub fn with_schedule(mut self, interval: Duration, recent_window: Duration) -> Self {
        self.interval = interval;
        self.recent_window = recent_window;
        self
    }

    /// Start the sync loop
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            zone = %self.provider.zone(),
            interval = ?self.interval,
            "DNS sync loop started"
        );

        match self.sync_all().await {
            Ok(summary) => info!(?summary, "Initial DNS sync complete"),
            Err(e) => error!("Error in initial DNS sync: {:?}", e),
        }

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        loop {
            ticker.tick().await;

            if let Err(e) = self.sync_recent().await {
                error!("Error in DNS sync loop: {:?}", e);
            }
        }
    }

    /// Ensure the CNAME of every app with an ingress
    pub async fn sync_all(&self) -> Result<SyncSummary> {
        let apps = self.platform.list_apps(&self.token).await?;
        Ok(self.sync(&apps, None).await)
    }

    /// Ensure the CNAME of apps created within the recent window
    pub async fn sync_recent(&self) -> Result<SyncSummary> {
        let window = chrono::Duration::from_std(self.recent_window)?;
        let cutoff = Utc::now() - window;
        let apps = self.platform.list_apps(&self.token).await?;
        let summary = self.sync(&apps, Some(cutoff)).await;
        if summary.checked > 0 {
            debug!(?summary, "DNS sync pass for recent sites");
        }
        Ok(summary)
    }

    async fn sync(&self, apps: &[App], cutoff: Option<DateTime<Utc>>) -> SyncSummary {
        let mut summary = SyncSummary::default();

        for (name, ingress) in apps_to_sync(apps, cutoff) {
            summary.checked += 1;
            match self.provider.ensure_cname(name, ingress).await {
                Ok(CnameOutcome::Created) => summary.created += 1,
                Ok(CnameOutcome::Updated) => summary.updated += 1,
                Ok(CnameOutcome::Unchanged) => {}
                Err(e) => {
                    warn!(site = %name, "Failed to sync DNS record: {:?}", e);
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}
