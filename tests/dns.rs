//! CNAME reconciliation against a mock Cloudflare API

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{app_json, PLATFORM_TOKEN, ZONE};
use site_operator::server::domain::{CloudflareDnsProvider, CnameOutcome, DnsProvider, DnsSyncLoop};
use site_operator::server::platform::PlatformClient;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockBuilder, MockServer, ResponseTemplate};

const DNS_TOKEN: &str = "cf-token";
const ZONE_ID: &str = "zone-123";

fn provider(server: &MockServer) -> CloudflareDnsProvider {
    CloudflareDnsProvider::new(&server.uri(), DNS_TOKEN.to_string(), ZONE.to_string()).unwrap()
}

fn envelope(result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "success": true, "errors": [], "messages": [], "result": result })
}

fn record(id: &str, name: &str, content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "type": "CNAME",
        "name": name,
        "content": content,
        "ttl": 1,
        "proxied": false
    })
}

async fn mount_zone(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/zones"))
        .and(query_param("name", ZONE))
        .and(header("authorization", format!("Bearer {}", DNS_TOKEN).as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(envelope(serde_json::json!([{ "id": ZONE_ID, "name": ZONE }]))),
        )
        .expect(1)
        .mount(server)
        .await;
}

fn list_records(name: &str) -> MockBuilder {
    Mock::given(method("GET"))
        .and(path(format!("/zones/{}/dns_records", ZONE_ID)))
        .and(query_param("type", "CNAME"))
        .and(query_param("name", name))
}

#[tokio::test]
async fn test_ensure_cname_is_idempotent() {
    let server = MockServer::start().await;
    mount_zone(&server).await;

    list_records("blog.example.com")
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!([]))))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    list_records("blog.example.com")
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!([
            record("rec-1", "blog.example.com", "blog-x7k2p.ondigitalocean.app")
        ]))))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/zones/{}/dns_records", ZONE_ID)))
        .and(body_partial_json(serde_json::json!({
            "type": "CNAME",
            "name": "blog.example.com",
            "content": "blog-x7k2p.ondigitalocean.app",
            "proxied": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(record(
            "rec-1",
            "blog.example.com",
            "blog-x7k2p.ondigitalocean.app",
        ))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let provider = provider(&server);
    let target = "https://blog-x7k2p.ondigitalocean.app/";

    assert_eq!(
        provider.ensure_cname("blog", target).await.unwrap(),
        CnameOutcome::Created
    );
    assert_eq!(
        provider.ensure_cname("blog", target).await.unwrap(),
        CnameOutcome::Unchanged
    );
}

#[tokio::test]
async fn test_stale_record_is_updated() {
    let server = MockServer::start().await;
    mount_zone(&server).await;

    list_records("shop.example.com")
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!([
            record("rec-9", "shop.example.com", "shop-old.ondigitalocean.app")
        ]))))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/zones/{}/dns_records/rec-9", ZONE_ID)))
        .and(body_partial_json(serde_json::json!({
            "content": "shop-new.ondigitalocean.app"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(record(
            "rec-9",
            "shop.example.com",
            "shop-new.ondigitalocean.app",
        ))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = provider(&server)
        .ensure_cname("shop.example.com", "shop-new.ondigitalocean.app")
        .await
        .unwrap();
    assert_eq!(outcome, CnameOutcome::Updated);
}

#[tokio::test]
async fn test_api_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/zones"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "success": false,
            "errors": [{ "code": 9109, "message": "Invalid access token" }],
            "result": null
        })))
        .mount(&server)
        .await;

    let err = provider(&server)
        .ensure_cname("blog", "blog-x7k2p.ondigitalocean.app")
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("Invalid access token"));
}

#[tokio::test]
async fn test_sync_all_creates_missing_records() {
    let platform_server = MockServer::start().await;
    let dns_server = MockServer::start().await;
    mount_zone(&dns_server).await;

    let mut pending = app_json("app-3", "draft");
    pending["default_ingress"] = serde_json::Value::Null;
    Mock::given(method("GET"))
        .and(path("/apps"))
        .and(header("authorization", format!("Bearer {}", PLATFORM_TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "apps": [app_json("app-1", "blog"), app_json("app-2", "shop"), pending]
        })))
        .mount(&platform_server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/zones/{}/dns_records", ZONE_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!([]))))
        .mount(&dns_server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/zones/{}/dns_records", ZONE_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(record(
            "rec-new",
            "site.example.com",
            "site.ondigitalocean.app",
        ))))
        .expect(2)
        .mount(&dns_server)
        .await;

    let platform = PlatformClient::new(&platform_server.uri(), Duration::from_secs(5)).unwrap();
    let sync = DnsSyncLoop::new(
        platform,
        PLATFORM_TOKEN.to_string(),
        Arc::new(provider(&dns_server)),
    );

    let summary = sync.sync_all().await.unwrap();
    assert_eq!(summary.checked, 2);
    assert_eq!(summary.created, 2);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn test_sync_recent_ignores_old_apps() {
    let platform_server = MockServer::start().await;
    let dns_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/apps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "apps": [app_json("app-1", "blog")]
        })))
        .mount(&platform_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&dns_server)
        .await;

    let platform = PlatformClient::new(&platform_server.uri(), Duration::from_secs(5)).unwrap();
    let sync = DnsSyncLoop::new(
        platform,
        PLATFORM_TOKEN.to_string(),
        Arc::new(provider(&dns_server)),
    )
    .with_schedule(Duration::from_secs(60), Duration::from_secs(600));

    let summary = sync.sync_recent().await.unwrap();
    assert_eq!(summary.checked, 0);
}
