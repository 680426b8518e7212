use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

use super::retention::{RetentionPolicy, TagInfo};
use crate::server::platform::models::GarbageCollection;
use crate::server::platform::PlatformClient;

/// Where the pruner is within a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrunerState {
    Idle,
    ListingRepositories,
    PruningRepository(String),
    GarbageCollecting,
}

/// Outcome of one pruning cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneReport {
    pub repositories: usize,
    pub tags_deleted: usize,
    pub repositories_deleted: usize,
    pub failures: usize,
    pub gc_triggered: bool,
}

impl PruneReport {
    fn deleted_anything(&self) -> bool {
        self.tags_deleted > 0 || self.repositories_deleted > 0
    }
}

/// Scheduled job that applies the retention policy to every repository of
/// the registry and then asks the platform to garbage collect.
pub struct Pruner {
    platform: PlatformClient,
    token: String,
    registry: String,
    policy: RetentionPolicy,
    initial_delay: Duration,
    interval: Duration,
    state: Mutex<PrunerState>,
}

impl Pruner {
    pub fn new(
        platform: PlatformClient,
        token: String,
        registry: String,
        policy: RetentionPolicy,
    ) -> Self {
        Self {
            platform,
            token,
            registry,
            policy,
            initial_delay: Duration::from_secs(30),
            interval: Duration::from_secs(24 * 60 * 60),
            state: Mutex::new(PrunerState::Idle),
        }
    }

    pub fn with_schedule(mut self, initial_delay: Duration, interval: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.interval = interval;
        self
    }

    pub fn state(&self) -> PrunerState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or(PrunerState::Idle)
    }

    fn set_state(&self, next: PrunerState) {
        if let Ok(mut state) = self.state.lock() {
            debug!(from = ?*state, to = ?next, "Pruner state change");
            *state = next;
        }
    }

    /// Start the schedule in the background
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            registry = %self.registry,
            depth = self.policy.depth,
            initial_delay = ?self.initial_delay,
            interval = ?self.interval,
            "Registry pruner started"
        );
        let mut ticker = interval_at(Instant::now() + self.initial_delay, self.interval);

        loop {
            ticker.tick().await;

            match self.prune().await {
                Ok(report) => info!(
                    repositories = report.repositories,
                    tags_deleted = report.tags_deleted,
                    repositories_deleted = report.repositories_deleted,
                    failures = report.failures,
                    gc_triggered = report.gc_triggered,
                    "Registry pruning cycle finished"
                ),
                Err(e) => error!("Error in registry pruning cycle: {:?}", e),
            }
        }
    }

    /// Run one pruning cycle
    pub async fn prune(&self) -> Result<PruneReport> {
        let result = self.prune_inner().await;
        self.set_state(PrunerState::Idle);
        result
    }

    async fn prune_inner(&self) -> Result<PruneReport> {
        let mut report = PruneReport::default();

        self.set_state(PrunerState::ListingRepositories);
        let repositories = self
            .platform
            .list_repositories(&self.token, &self.registry)
            .await?;
        report.repositories = repositories.len();
        info!(
            count = repositories.len(),
            registry = %self.registry,
            "Pruning registry repositories"
        );

        for repository in repositories {
            self.set_state(PrunerState::PruningRepository(repository.name.clone()));
            if let Err(e) = self.prune_repository(&repository.name, &mut report).await {
                warn!(repository = %repository.name, "Failed to prune repository: {:?}", e);
                report.failures += 1;
            }
        }

        if report.deleted_anything() {
            self.set_state(PrunerState::GarbageCollecting);
            match self
                .platform
                .start_garbage_collection(&self.token, &self.registry)
                .await
            {
                Ok(GarbageCollection::Started) => {
                    info!(registry = %self.registry, "Registry garbage collection started");
                    report.gc_triggered = true;
                }
                Ok(GarbageCollection::AlreadyRunning) => {
                    info!(registry = %self.registry, "Registry garbage collection already running");
                    report.gc_triggered = true;
                }
                Err(e) => {
                    warn!(registry = %self.registry, "Failed to start garbage collection: {}", e);
                    report.failures += 1;
                }
            }
        } else {
            debug!("Nothing deleted, skipping garbage collection");
        }

        Ok(report)
    }

    async fn prune_repository(&self, repository: &str, report: &mut PruneReport) -> Result<()> {
        let tags = self
            .platform
            .list_tags(&self.token, &self.registry, repository)
            .await?;

        if tags.is_empty() {
            info!(repository = %repository, "Repository has no tags, deleting it");
            self.platform
                .delete_repository(&self.token, &self.registry, repository)
                .await?;
            report.repositories_deleted += 1;
            return Ok(());
        }

        let infos: Vec<TagInfo> = tags
            .into_iter()
            .map(|t| TagInfo::new(t.tag, t.updated_at))
            .collect();
        let decision = self.policy.decide(&infos);

        info!(
            repository = %repository,
            keep = ?decision.keep,
            delete = ?decision.delete,
            "Retention decision"
        );

        for tag in &decision.delete {
            match self
                .platform
                .delete_tag(&self.token, &self.registry, repository, tag)
                .await
            {
                Ok(()) => {
                    debug!(repository = %repository, tag = %tag, "Deleted tag");
                    report.tags_deleted += 1;
                }
                Err(e) => {
                    warn!(repository = %repository, tag = %tag, "Failed to delete tag: {}", e);
                    report.failures += 1;
                }
            }
        }

        Ok(())
    }
}
