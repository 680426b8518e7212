use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::{info, warn};

use super::models::{
    CreateSiteRequest, DeployQuery, DeployResponse, SiteResponse, SitesListResponse,
};
use super::service::{
    build_app_spec, find_app_by_name, resolve_token, wait_for_tag, SpecDefaults,
};
use crate::server::deployment::{DeploymentPhase, DeploymentPoller, PollError};
use crate::server::deployment::state_machine::is_failed;
use crate::server::error::ServerError;
use crate::server::platform::models::App;
use crate::server::state::AppState;

fn site_not_found() -> ServerError {
    ServerError::not_found("Site not found")
}

async fn resolve_site(state: &AppState, token: &str, name: &str) -> Result<App, ServerError> {
    find_app_by_name(&state.platform, token, name)
        .await
        .map_err(ServerError::from_platform)?
        .ok_or_else(site_not_found)
}

/// List all sites
pub async fn list_sites(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SitesListResponse>, ServerError> {
    let token = resolve_token(&headers, &state.settings.platform.token)?;

    let apps = state
        .platform
        .list_apps(&token)
        .await
        .map_err(ServerError::from_platform)?;

    Ok(Json(SitesListResponse {
        sites: apps.iter().map(SiteResponse::from).collect(),
    }))
}

/// Create a new site from an image in the registry
pub async fn create_site(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateSiteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SiteResponse>), ServerError> {
    let token = resolve_token(&headers, &state.settings.platform.token)?;
    let Json(payload) = payload
        .map_err(|e| ServerError::bad_request(format!("Invalid request body: {}", e.body_text())))?;

    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(ServerError::bad_request("name is required"));
    }

    let registry = &state.settings.registry.namespace;
    if registry.is_empty() {
        return Err(ServerError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Registry namespace not configured",
        ));
    }

    let image = payload
        .image
        .as_deref()
        .map(str::trim)
        .filter(|i| !i.is_empty())
        .unwrap_or(&name)
        .to_string();
    let tag = payload
        .tag
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("latest")
        .to_string();

    info!(site = %name, image = %image, tag = %tag, "Creating site");

    let sites = &state.settings.sites;
    wait_for_tag(
        &state.platform,
        &token,
        registry,
        &image,
        &tag,
        sites.tag_check_attempts,
        Duration::from_millis(sites.tag_check_delay_ms),
    )
    .await
    .map_err(|e| ServerError::not_found(format!("Image tag not available: {}", e)))?;

    let spec = build_app_spec(
        &name,
        &image,
        &tag,
        &payload.domains,
        &SpecDefaults::from_settings(&state.settings),
    );

    let app = state
        .platform
        .create_app(&token, &spec)
        .await
        .map_err(|e| ServerError::from_platform(e).with_context("site", name.clone()))?;

    info!(site = %name, app_id = %app.id, "Site created");

    if let (Some(dns), Some(ingress)) = (&state.dns_provider, app.ingress_host()) {
        if let Err(e) = dns.ensure_cname(&name, ingress).await {
            warn!(site = %name, "Failed to create DNS record, the sync loop will retry: {:?}", e);
        }
    }

    let mut site = SiteResponse::from(&app);
    if site.name.is_empty() {
        site.name = name;
    }
    site.urls.clear();
    site.status = None;
    site.updated_at = None;

    Ok((StatusCode::CREATED, Json(site)))
}

/// Get a site by name
pub async fn get_site(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<SiteResponse>, ServerError> {
    let token = resolve_token(&headers, &state.settings.platform.token)?;
    let summary = resolve_site(&state, &token, &name).await?;

    let app = state
        .platform
        .get_app(&token, &summary.id)
        .await
        .map_err(ServerError::from_platform)?;

    Ok(Json(SiteResponse::from(&app)))
}

/// Delete a site by name
pub async fn delete_site(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<StatusCode, ServerError> {
    let token = resolve_token(&headers, &state.settings.platform.token)?;
    let app = resolve_site(&state, &token, &name).await?;

    state
        .platform
        .delete_app(&token, &app.id)
        .await
        .map_err(ServerError::from_platform)?;

    info!(site = %name, app_id = %app.id, "Site deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Trigger a rebuild and redeploy of a site
pub async fn deploy_site(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Query(query): Query<DeployQuery>,
) -> Result<(StatusCode, Json<DeployResponse>), ServerError> {
    let token = resolve_token(&headers, &state.settings.platform.token)?;
    let app = resolve_site(&state, &token, &name).await?;

    let deployment = state
        .platform
        .create_deployment(&token, &app.id, true)
        .await
        .map_err(ServerError::from_platform)?;

    info!(
        site = %name,
        deployment_id = %deployment.id,
        phase = %deployment.phase,
        "Deployment created"
    );

    if !query.wait {
        return Ok((
            StatusCode::CREATED,
            Json(DeployResponse {
                deployment_id: deployment.id,
                status: deployment.phase,
            }),
        ));
    }

    let sites = &state.settings.sites;
    let poller = DeploymentPoller::new(
        state.platform.clone(),
        Duration::from_millis(sites.deployment_poll_interval_ms),
        Duration::from_secs(sites.deployment_timeout_secs),
    );

    let phase = poller
        .wait(
            &token,
            &app.id,
            &deployment.id,
            DeploymentPhase::parse(&deployment.phase),
        )
        .await
        .map_err(|e| match e {
            PollError::Platform(e) => ServerError::wrap_platform(e, "Failed to poll deployment"),
            PollError::Timeout { .. } => ServerError::new(StatusCode::GATEWAY_TIMEOUT, e.to_string()),
        })?;

    if is_failed(&phase) {
        return Err(ServerError::new(
            StatusCode::BAD_GATEWAY,
            format!("Deployment {} finished in phase {}", deployment.id, phase),
        )
        .with_context("site", name));
    }

    Ok((
        StatusCode::CREATED,
        Json(DeployResponse {
            deployment_id: deployment.id,
            status: phase.to_string(),
        }),
    ))
}
