//! Credential cache against a mock platform API

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{basic_secret, docker_config, PLATFORM_TOKEN};
use site_operator::server::platform::PlatformClient;
use site_operator::server::registry::{CredentialCache, CredentialError, RepoTokenProvider};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REGISTRY_HOST: &str = "registry.example.com";

fn cache(server: &MockServer) -> CredentialCache {
    let platform = PlatformClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
    CredentialCache::new(platform, PLATFORM_TOKEN.to_string(), REGISTRY_HOST.to_string())
}

fn credentials_mock() -> Mock {
    Mock::given(method("GET"))
        .and(path("/registry/docker-credentials"))
        .and(header("authorization", format!("Bearer {}", PLATFORM_TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(docker_config(REGISTRY_HOST)))
}

#[tokio::test]
async fn test_concurrent_callers_share_one_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/registry/docker-credentials"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(docker_config(REGISTRY_HOST))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(cache(&server));
    let calls = (0..8).map(|_| {
        let cache = cache.clone();
        async move { cache.docker_credentials().await }
    });
    let results = futures::future::join_all(calls).await;

    for result in results {
        assert_eq!(result.unwrap(), basic_secret());
    }
}

#[tokio::test]
async fn test_credential_reused_within_ttl() {
    let server = MockServer::start().await;
    credentials_mock().expect(1).mount(&server).await;

    let cache = cache(&server);
    assert_eq!(cache.docker_credentials().await.unwrap(), basic_secret());
    assert_eq!(cache.docker_credentials().await.unwrap(), basic_secret());
}

#[tokio::test]
async fn test_expired_credential_is_refetched() {
    let server = MockServer::start().await;
    credentials_mock().expect(2).mount(&server).await;

    let cache = cache(&server).with_ttl(Duration::ZERO);
    cache.docker_credentials().await.unwrap();
    cache.docker_credentials().await.unwrap();
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let server = MockServer::start().await;
    credentials_mock().expect(2).mount(&server).await;

    let cache = cache(&server);
    cache.docker_credentials().await.unwrap();
    cache.invalidate().await;
    cache.docker_credentials().await.unwrap();
}

#[tokio::test]
async fn test_missing_registry_entry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/registry/docker-credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(docker_config("other.example.com")))
        .mount(&server)
        .await;

    let err = cache(&server).docker_credentials().await.unwrap_err();
    assert!(matches!(err, CredentialError::MissingAuth { ref host } if host == REGISTRY_HOST));
}

#[tokio::test]
async fn test_repo_token_is_scoped_to_repository() {
    let server = MockServer::start().await;
    credentials_mock().expect(1).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/registry/auth"))
        .and(query_param("service", REGISTRY_HOST))
        .and(query_param("scope", "repository:acme/blog:push,pull"))
        .and(header("authorization", format!("Basic {}", basic_secret()).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "scoped-token"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let cache = cache(&server);
    assert_eq!(cache.repo_token("acme/blog").await.unwrap(), "scoped-token");
    // Tokens are minted per request, only the credential is cached
    assert_eq!(cache.repo_token("acme/blog").await.unwrap(), "scoped-token");
}

#[tokio::test]
async fn test_rejected_credential_is_refreshed_once() {
    let server = MockServer::start().await;
    credentials_mock().expect(2).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/registry/auth"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/registry/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": "fresh-token"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = cache(&server).repo_token("acme/blog").await.unwrap();
    assert_eq!(token, "fresh-token");
}

#[tokio::test]
async fn test_second_rejection_is_returned() {
    let server = MockServer::start().await;
    credentials_mock().expect(2).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/registry/auth"))
        .respond_with(ResponseTemplate::new(403))
        .expect(2)
        .mount(&server)
        .await;

    let err = cache(&server).repo_token("acme/blog").await.unwrap_err();
    match err {
        CredentialError::Platform(e) => assert!(e.is_auth_failure()),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_token_is_an_error() {
    let server = MockServer::start().await;
    credentials_mock().mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/registry/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let err = cache(&server).repo_token("acme/blog").await.unwrap_err();
    assert!(matches!(err, CredentialError::EmptyToken));
}
