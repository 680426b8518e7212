use std::time::Duration;

use anyhow::{bail, Result};
use axum::http::{header, HeaderMap};

use crate::server::error::ServerError;
use crate::server::platform::models::{
    AlertSpec, App, AppSpec, ComponentRef, DeployOnPush, DomainSpec, DomainType, EnvVarSpec,
    EnvVarType, ImageSourceSpec, IngressMatch, IngressRule, IngressSpec, PathMatch, ServiceSpec,
};
use crate::server::platform::{PlatformClient, PlatformError};
use crate::server::settings::Settings;

/// Bearer token for a sites request: the caller's `Authorization` header
/// (with or without the `Bearer ` prefix), else the operator's platform token.
pub fn resolve_token(headers: &HeaderMap, default_token: &str) -> Result<String, ServerError> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim())
        .filter(|v| !v.is_empty());

    match from_header {
        Some(token) => Ok(token.to_string()),
        None if !default_token.is_empty() => Ok(default_token.to_string()),
        None => Err(ServerError::unauthorized(
            "Missing Authorization header and no platform token configured",
        )),
    }
}

/// Resolve a site name to its app. Apps are listed and scanned since the
/// platform has no lookup by name.
pub async fn find_app_by_name(
    platform: &PlatformClient,
    token: &str,
    name: &str,
) -> Result<Option<App>, PlatformError> {
    let apps = platform.list_apps(token).await?;
    Ok(apps.into_iter().find(|app| app.name() == name))
}

/// Check whether `tag` is listed for `repository`. Listing errors count as absent.
async fn tag_exists(
    platform: &PlatformClient,
    token: &str,
    registry: &str,
    repository: &str,
    tag: &str,
) -> Result<bool, PlatformError> {
    match platform.list_tags(token, registry, repository).await {
        Ok(tags) => Ok(tags.iter().any(|t| t.tag == tag)),
        Err(PlatformError::Api { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Wait until a freshly pushed tag shows up in the registry listing
pub async fn wait_for_tag(
    platform: &PlatformClient,
    token: &str,
    registry: &str,
    repository: &str,
    tag: &str,
    attempts: u32,
    delay: Duration,
) -> Result<()> {
    for attempt in 1..=attempts {
        match tag_exists(platform, token, registry, repository, tag).await {
            Ok(true) => {
                tracing::info!(repository = %repository, tag = %tag, "Tag verified in registry");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(
                repository = %repository,
                tag = %tag,
                attempt,
                attempts,
                "Error checking tag existence: {}",
                e
            ),
        }

        if attempt < attempts {
            tracing::info!(
                repository = %repository,
                tag = %tag,
                attempt,
                attempts,
                "Tag not yet indexed, retrying in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    bail!(
        "tag {}:{} not found in registry after {} attempts",
        repository,
        tag,
        attempts
    )
}

/// Fixed parts of every app spec the operator creates
#[derive(Debug, Clone)]
pub struct SpecDefaults {
    pub region: String,
    pub http_port: u16,
    pub instance_count: u32,
    pub instance_size: String,
    pub registry: String,
    pub zone: String,
    pub operator_url: String,
    pub operator_token: String,
}

impl SpecDefaults {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            region: settings.platform.region.clone(),
            http_port: settings.platform.http_port,
            instance_count: settings.platform.instance_count,
            instance_size: settings.platform.instance_size.clone(),
            registry: settings.registry.namespace.clone(),
            zone: settings.dns.zone.clone(),
            operator_url: settings.operator.url.clone(),
            operator_token: settings.operator.token.clone(),
        }
    }
}

/// Build the app spec for a new site: one service running the image, its
/// primary hostname under the managed zone plus any alias domains.
pub fn build_app_spec(
    name: &str,
    image: &str,
    tag: &str,
    domains: &[String],
    defaults: &SpecDefaults,
) -> AppSpec {
    let mut domain_specs = Vec::with_capacity(domains.len() + 1);
    if !defaults.zone.is_empty() {
        domain_specs.push(DomainSpec {
            domain: format!("{}.{}", name, defaults.zone),
            domain_type: DomainType::Primary,
        });
    }
    domain_specs.extend(
        domains
            .iter()
            .map(|d| d.trim())
            .filter(|d| !d.is_empty())
            .map(|d| DomainSpec {
                domain: d.to_string(),
                domain_type: DomainType::Alias,
            }),
    );

    AppSpec {
        name: name.to_string(),
        region: defaults.region.clone(),
        features: vec!["buildpack-stack=ubuntu-22".to_string()],
        alerts: vec![
            AlertSpec {
                rule: "DEPLOYMENT_FAILED".to_string(),
            },
            AlertSpec {
                rule: "DOMAIN_FAILED".to_string(),
            },
        ],
        domains: domain_specs,
        ingress: IngressSpec {
            rules: vec![IngressRule {
                component: ComponentRef {
                    name: name.to_string(),
                },
                match_: IngressMatch {
                    path: PathMatch {
                        prefix: "/".to_string(),
                    },
                },
            }],
        },
        services: vec![ServiceSpec {
            name: name.to_string(),
            http_port: defaults.http_port,
            image: ImageSourceSpec {
                registry_type: "DOCR".to_string(),
                registry: defaults.registry.clone(),
                repository: image.to_string(),
                tag: tag.to_string(),
                deploy_on_push: DeployOnPush { enabled: true },
            },
            instance_count: defaults.instance_count,
            instance_size_slug: defaults.instance_size.clone(),
            envs: vec![
                EnvVarSpec {
                    key: "OPERATOR_URL".to_string(),
                    value: defaults.operator_url.clone(),
                    var_type: EnvVarType::General,
                },
                EnvVarSpec {
                    key: "OPERATOR_TOKEN".to_string(),
                    value: defaults.operator_token.clone(),
                    var_type: EnvVarType::Secret,
                },
            ],
        }],
    }
}
