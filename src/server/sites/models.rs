use serde::{Deserialize, Serialize};

use crate::server::platform::models::App;

/// Create site request
#[derive(Debug, Deserialize)]
pub struct CreateSiteRequest {
    #[serde(default)]
    pub name: String,
    /// Repository in the registry namespace, defaults to the site name
    #[serde(default)]
    pub image: Option<String>,
    /// Defaults to "latest"
    #[serde(default)]
    pub tag: Option<String>,
    /// Extra hostnames attached as aliases
    #[serde(default)]
    pub domains: Vec<String>,
}

/// A site as returned by the API
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SiteResponse {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl From<&App> for SiteResponse {
    fn from(app: &App) -> Self {
        let urls = [app.live_url.as_deref(), app.default_ingress.as_deref()]
            .into_iter()
            .flatten()
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect();

        SiteResponse {
            id: app.id.clone(),
            name: app.name().to_string(),
            region: app.spec.region.clone().filter(|r| !r.is_empty()),
            urls,
            status: app
                .active_deployment
                .as_ref()
                .map(|d| d.phase.clone())
                .filter(|p| !p.is_empty()),
            updated_at: app.updated_at.clone().filter(|u| !u.is_empty()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SitesListResponse {
    pub sites: Vec<SiteResponse>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeployQuery {
    /// Block until the deployment reaches a terminal phase
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeployResponse {
    pub deployment_id: String,
    pub status: String,
}
