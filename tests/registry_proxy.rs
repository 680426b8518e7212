//! Registry V2 proxy behavior against a mock upstream registry

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::{basic_secret, docker_config, json_body, send, Upstreams};
use wiremock::matchers::{body_string, header as header_eq, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_credentials(upstreams: &Upstreams, repo: &str, token: &str) {
    Mock::given(method("GET"))
        .and(path("/registry/docker-credentials"))
        .and(query_param("read_write", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(docker_config(&upstreams.registry_host())))
        .mount(&upstreams.platform)
        .await;

    Mock::given(method("GET"))
        .and(path("/registry/auth"))
        .and(query_param("scope", format!("repository:{}:push,pull", repo).as_str()))
        .and(header_eq("authorization", format!("Basic {}", basic_secret()).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": token })))
        .mount(&upstreams.platform)
        .await;
}

#[tokio::test]
async fn test_base_check_accepts_any_credentials() {
    let upstreams = Upstreams::start().await;
    let router = upstreams.router(upstreams.settings());

    let request = Request::builder()
        .uri("/v2/")
        .header(header::AUTHORIZATION, "Basic anything")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("docker-distribution-api-version").unwrap(),
        "registry/2.0"
    );
    assert_eq!(json_body(&body), serde_json::json!({}));
}

#[tokio::test]
async fn test_manifest_push_is_rewritten_and_authenticated() {
    let upstreams = Upstreams::start().await;
    mount_credentials(&upstreams, "acme/blog", "repo-token").await;

    let manifest = r#"{"schemaVersion":2}"#;
    let upstream_location = format!(
        "{}/v2/acme/blog/manifests/sha256:abc123",
        upstreams.registry.uri()
    );
    Mock::given(method("PUT"))
        .and(path("/v2/acme/blog/manifests/latest"))
        .and(header_eq("authorization", "Bearer repo-token"))
        .and(header_eq("content-length", manifest.len().to_string().as_str()))
        .and(body_string(manifest))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("location", upstream_location.as_str())
                .insert_header("docker-content-digest", "sha256:abc123"),
        )
        .expect(1)
        .mount(&upstreams.registry)
        .await;

    let router = upstreams.router(upstreams.settings());
    let request = Request::builder()
        .method("PUT")
        .uri("/v2/blog/manifests/latest")
        .header(header::AUTHORIZATION, "Basic client-credentials")
        .header(
            header::CONTENT_TYPE,
            "application/vnd.docker.distribution.manifest.v2+json",
        )
        .header(header::CONTENT_LENGTH, manifest.len())
        .body(Body::from(manifest))
        .unwrap();
    let (status, headers, _) = send(router, request).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        headers.get(header::LOCATION).unwrap(),
        "/v2/acme/blog/manifests/sha256:abc123"
    );
    assert_eq!(headers.get("docker-content-digest").unwrap(), "sha256:abc123");
}

#[tokio::test]
async fn test_already_namespaced_path_is_not_prefixed_twice() {
    let upstreams = Upstreams::start().await;
    mount_credentials(&upstreams, "acme/blog", "repo-token").await;

    Mock::given(method("GET"))
        .and(path("/v2/acme/blog/tags/list"))
        .and(query_param("n", "10"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"name": "acme/blog", "tags": ["latest"]})),
        )
        .expect(1)
        .mount(&upstreams.registry)
        .await;

    let router = upstreams.router(upstreams.settings());
    let request = Request::builder()
        .uri("/v2/acme/blog/tags/list?n=10")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["tags"][0], "latest");
}

#[tokio::test]
async fn test_external_redirect_location_is_kept() {
    let upstreams = Upstreams::start().await;
    mount_credentials(&upstreams, "acme/blog", "repo-token").await;

    // Upload locations on another host are returned untouched
    let signed = "https://cdn.example.net/blobs/upload?sig=abc";
    Mock::given(method("POST"))
        .and(path("/v2/acme/blog/blobs/uploads/"))
        .respond_with(
            ResponseTemplate::new(202)
                .insert_header("location", signed)
                .insert_header("docker-upload-uuid", "uuid-1"),
        )
        .mount(&upstreams.registry)
        .await;

    let router = upstreams.router(upstreams.settings());
    let request = Request::builder()
        .method("POST")
        .uri("/v2/blog/blobs/uploads/")
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(router, request).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(headers.get(header::LOCATION).unwrap(), signed);
    assert_eq!(headers.get("docker-upload-uuid").unwrap(), "uuid-1");
}

#[tokio::test]
async fn test_blob_redirect_followed_without_registry_token() {
    let upstreams = Upstreams::start().await;
    mount_credentials(&upstreams, "acme/blog", "repo-token").await;
    let cdn = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/acme/blog/blobs/sha256:abc"))
        .and(header_eq("authorization", "Bearer repo-token"))
        .respond_with(
            ResponseTemplate::new(307)
                .insert_header("location", format!("{}/blobs/abc?sig=xyz", cdn.uri()).as_str()),
        )
        .expect(1)
        .mount(&upstreams.registry)
        .await;
    Mock::given(method("GET"))
        .and(path("/blobs/abc"))
        .and(query_param("sig", "xyz"))
        .respond_with(ResponseTemplate::new(200).set_body_string("BLOBDATA"))
        .expect(1)
        .mount(&cdn)
        .await;

    let router = upstreams.router(upstreams.settings());
    let request = Request::builder()
        .uri("/v2/blog/blobs/sha256:abc")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"BLOBDATA");

    let received = cdn.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_client_credentials_forwarded_without_platform_token() {
    let upstreams = Upstreams::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/acme/blog/manifests/latest"))
        .and(header_eq("authorization", "Basic client-credentials"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("www-authenticate", r#"Bearer realm="https://auth.example.com/token""#)
                .set_body_json(serde_json::json!({"errors": [{"code": "UNAUTHORIZED"}]})),
        )
        .expect(1)
        .mount(&upstreams.registry)
        .await;

    let mut settings = upstreams.settings();
    settings.platform.token.clear();
    let router = upstreams.router(settings);

    let request = Request::builder()
        .uri("/v2/blog/manifests/latest")
        .header(header::AUTHORIZATION, "Basic client-credentials")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(router, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        headers.get(header::WWW_AUTHENTICATE).unwrap(),
        r#"Bearer realm="https://auth.example.com/token""#
    );
    assert_eq!(json_body(&body)["errors"][0]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_credential_failure_is_bad_gateway() {
    let upstreams = Upstreams::start().await;

    Mock::given(method("GET"))
        .and(path("/registry/docker-credentials"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&upstreams.platform)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstreams.registry)
        .await;

    let router = upstreams.router(upstreams.settings());
    let request = Request::builder()
        .uri("/v2/blog/manifests/latest")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(router, request).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(&body)["error"], "Authentication error");
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let upstreams = Upstreams::start().await;

    let mut settings = upstreams.settings();
    settings.platform.token.clear();
    // Nothing listens on port 9 of localhost
    settings.registry.upstream = "http://127.0.0.1:9".to_string();
    let router = upstreams.router(settings);

    let request = Request::builder()
        .uri("/v2/blog/tags/list")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(router, request).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(&body)["error"], "Upstream error");
}
