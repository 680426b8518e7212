//! Shared fixtures for the HTTP-level integration tests

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use base64::Engine;
use http_body_util::BodyExt;
use site_operator::server::build_router;
use site_operator::server::settings::Settings;
use site_operator::server::state::AppState;
use tower::ServiceExt;
use wiremock::MockServer;

pub const PLATFORM_TOKEN: &str = "operator-platform-token";
pub const NAMESPACE: &str = "acme";
pub const ZONE: &str = "example.com";

/// Mock upstreams for one test: the platform API, the registry and the DNS API
pub struct Upstreams {
    pub platform: MockServer,
    pub registry: MockServer,
    pub dns: MockServer,
}

impl Upstreams {
    pub async fn start() -> Self {
        Self {
            platform: MockServer::start().await,
            registry: MockServer::start().await,
            dns: MockServer::start().await,
        }
    }

    /// Settings pointing every upstream at the mocks, with short retry delays
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.platform.api_url = self.platform.uri();
        settings.platform.token = PLATFORM_TOKEN.to_string();
        settings.registry.upstream = self.registry.uri();
        settings.registry.namespace = NAMESPACE.to_string();
        settings.dns.api_url = self.dns.uri();
        settings.sites.tag_check_attempts = 3;
        settings.sites.tag_check_delay_ms = 10;
        settings.sites.deployment_poll_interval_ms = 10;
        settings.sites.deployment_timeout_secs = 5;
        settings
    }

    /// Host key of the mock registry in docker credentials
    pub fn registry_host(&self) -> String {
        self.registry.address().to_string()
    }

    pub fn router(&self, settings: Settings) -> Router {
        let state = AppState::new(settings).expect("state builds from test settings");
        build_router(state)
    }
}

pub fn basic_secret() -> String {
    base64::engine::general_purpose::STANDARD.encode("op-user:op-pass")
}

/// Docker config JSON as returned by the platform for `host`
pub fn docker_config(host: &str) -> serde_json::Value {
    serde_json::json!({
        "auths": {
            host: { "auth": basic_secret() }
        }
    })
}

pub fn app_json(id: &str, name: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "spec": { "name": name, "region": "nyc" },
        "default_ingress": format!("https://{}-x7k2p.ondigitalocean.app", name),
        "live_url": format!("https://{}.example.com", name),
        "active_deployment": { "id": "dep-0", "phase": "ACTIVE" },
        "created_at": "2024-05-01T12:00:00Z",
        "updated_at": "2024-05-01T12:05:00Z"
    })
}

/// Run one request through the router and collect the whole response
pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
    let response = router.oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("response body")
        .to_bytes()
        .to_vec();
    (status, headers, body)
}

pub fn json_body(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).expect("response body is JSON")
}
