use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Applications
// ---------------------------------------------------------------------------

/// An application as returned by the platform
#[derive(Debug, Clone, Deserialize)]
pub struct App {
    pub id: String,
    #[serde(default)]
    pub spec: AppSpecSummary,
    #[serde(default)]
    pub default_ingress: Option<String>,
    #[serde(default)]
    pub live_url: Option<String>,
    #[serde(default)]
    pub active_deployment: Option<Deployment>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl App {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Default ingress host without scheme, if the platform assigned one
    pub fn ingress_host(&self) -> Option<&str> {
        self.default_ingress
            .as_deref()
            .map(|ingress| {
                ingress
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
            })
            .filter(|host| !host.is_empty())
    }
}

/// The parts of an app spec the operator reads back
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSpecSummary {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AppEnvelope {
    pub app: App,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AppsPage {
    #[serde(default)]
    pub apps: Vec<App>,
    #[serde(default)]
    pub links: Option<Links>,
}

/// Pagination links attached to list responses
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Links {
    #[serde(default)]
    pub pages: Option<PageLinks>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PageLinks {
    #[serde(default)]
    pub next: Option<String>,
}

impl Links {
    pub fn has_next(links: &Option<Links>) -> bool {
        links
            .as_ref()
            .and_then(|l| l.pages.as_ref())
            .and_then(|p| p.next.as_ref())
            .is_some()
    }
}

/// App spec submitted on creation
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AppSpec {
    pub name: String,
    pub region: String,
    pub features: Vec<String>,
    pub alerts: Vec<AlertSpec>,
    pub domains: Vec<DomainSpec>,
    pub ingress: IngressSpec,
    pub services: Vec<ServiceSpec>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AlertSpec {
    pub rule: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DomainType {
    Primary,
    Alias,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DomainSpec {
    pub domain: String,
    #[serde(rename = "type")]
    pub domain_type: DomainType,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngressSpec {
    pub rules: Vec<IngressRule>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngressRule {
    pub component: ComponentRef,
    #[serde(rename = "match")]
    pub match_: IngressMatch,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ComponentRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngressMatch {
    pub path: PathMatch,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PathMatch {
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServiceSpec {
    pub name: String,
    pub http_port: u16,
    pub image: ImageSourceSpec,
    pub instance_count: u32,
    pub instance_size_slug: String,
    pub envs: Vec<EnvVarSpec>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImageSourceSpec {
    pub registry_type: String,
    pub registry: String,
    pub repository: String,
    pub tag: String,
    pub deploy_on_push: DeployOnPush,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeployOnPush {
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnvVarType {
    General,
    Secret,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EnvVarSpec {
    pub key: String,
    pub value: String,
    #[serde(rename = "type")]
    pub var_type: EnvVarType,
}

// ---------------------------------------------------------------------------
// Deployments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub phase: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeploymentEnvelope {
    pub deployment: Deployment,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RepositoriesPage {
    #[serde(default)]
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub links: Option<Links>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryTag {
    pub tag: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TagsPage {
    #[serde(default)]
    pub tags: Vec<RepositoryTag>,
    #[serde(default)]
    pub links: Option<Links>,
}

/// Docker `config.json` shaped credentials document
#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: HashMap<String, DockerAuth>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerAuth {
    #[serde(default)]
    pub auth: String,
}

/// Registry token endpoint response. Registries answer with either field.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryToken {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl RegistryToken {
    pub fn into_token(self) -> Option<String> {
        self.token
            .filter(|t| !t.is_empty())
            .or(self.access_token.filter(|t| !t.is_empty()))
    }
}

/// Result of a garbage collection request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GarbageCollection {
    Started,
    AlreadyRunning,
}
