use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use url::Url;

use super::credentials::RepoTokenProvider;
use crate::server::error::{ServerError, ServerErrorExt};

/// Redirect hops followed before giving up
const MAX_REDIRECTS: usize = 10;

/// Client headers copied onto the upstream request
static FORWARDED_REQUEST_HEADERS: [HeaderName; 11] = [
    header::ACCEPT,
    header::ACCEPT_ENCODING,
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::RANGE,
    header::IF_NONE_MATCH,
    header::IF_MATCH,
    HeaderName::from_static("docker-content-digest"),
    HeaderName::from_static("docker-distribution-api-version"),
    header::USER_AGENT,
];

/// Upstream headers copied onto the client response
static FORWARDED_RESPONSE_HEADERS: [HeaderName; 11] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    HeaderName::from_static("docker-content-digest"),
    HeaderName::from_static("docker-distribution-api-version"),
    HeaderName::from_static("docker-upload-uuid"),
    header::ETAG,
    header::LOCATION,
    header::RANGE,
    header::WWW_AUTHENTICATE,
    header::X_CONTENT_TYPE_OPTIONS,
];

/// Insert the registry namespace after `/v2/` unless it is already there.
///
/// `/v2/blog/manifests/latest` becomes `/v2/acme/blog/manifests/latest`.
/// Paths outside `/v2/`, the bare base path and an empty namespace are left
/// unchanged; applying the rewrite twice gives the same result.
pub fn rewrite_path(path: &str, namespace: &str) -> String {
    if namespace.is_empty() {
        return path.to_string();
    }
    let Some(rest) = path.strip_prefix("/v2/") else {
        return path.to_string();
    };
    if rest.is_empty() || rest.starts_with(&format!("{}/", namespace)) {
        return path.to_string();
    }
    format!("/v2/{}/{}", namespace, rest)
}

/// Repository a registry path refers to, as `<namespace>/<name>`.
///
/// Only the first segment after the namespace is taken, so nested image
/// names are not supported.
pub fn repository_path(path: &str, namespace: &str) -> Option<String> {
    let rest = path.strip_prefix("/v2/")?;
    let rest = rest
        .strip_prefix(namespace)
        .and_then(|r| r.strip_prefix('/'))
        .filter(|_| !namespace.is_empty())
        .unwrap_or(rest);

    let name = rest.split('/').next().filter(|s| !s.is_empty())?;
    if namespace.is_empty() {
        Some(name.to_string())
    } else {
        Some(format!("{}/{}", namespace, name))
    }
}

/// Strip the upstream origin from a `Location` value so the client keeps
/// talking to the proxy. Other absolute URLs (signed CDN links) stay intact.
pub fn rewrite_location(location: &str, upstream_origin: &str) -> String {
    match location.strip_prefix(upstream_origin) {
        Some(rest) if rest.is_empty() => "/".to_string(),
        Some(rest) if rest.starts_with('/') || rest.starts_with('?') => rest.to_string(),
        _ => location.to_string(),
    }
}

fn is_manifest_path(path: &str) -> bool {
    path.contains("/manifests/")
}

/// Docker registry V2 proxy that pins every request to one namespace of the
/// upstream registry and substitutes the operator's credentials.
pub struct RegistryProxy {
    upstream: Url,
    upstream_origin: String,
    namespace: String,
    http: reqwest::Client,
    tokens: Option<Arc<dyn RepoTokenProvider>>,
}

impl RegistryProxy {
    pub fn new(
        upstream: Url,
        namespace: String,
        tokens: Option<Arc<dyn RepoTokenProvider>>,
    ) -> Result<Self> {
        let upstream_host = upstream
            .host_str()
            .context("Upstream registry URL has no host")?
            .to_string();
        let upstream_origin = upstream.origin().ascii_serialization();

        let redirect_host = upstream_host.clone();
        let redirect_port = upstream.port_or_known_default();
        let redirect_policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            if attempt.url().host_str() != Some(redirect_host.as_str())
                || attempt.url().port_or_known_default() != redirect_port
            {
                // reqwest drops Authorization on cross-host hops; pre-signed
                // URLs carry their own credentials in the query string
                tracing::debug!(
                    target_host = attempt.url().host_str().unwrap_or_default(),
                    "Following registry redirect to external host"
                );
            }
            attempt.follow()
        });

        // Uploads can be arbitrarily large, so no overall timeout
        let http = reqwest::Client::builder()
            .redirect(redirect_policy)
            .pool_max_idle_per_host(100)
            .build()
            .context("Failed to build registry HTTP client")?;

        tracing::info!(
            upstream = %upstream_origin,
            namespace = %namespace,
            token_injection = tokens.is_some(),
            "Registry proxy configured"
        );

        Ok(Self {
            upstream,
            upstream_origin,
            namespace,
            http,
            tokens,
        })
    }

    /// Answer of the `/v2/` version check. Any client credentials are accepted.
    pub fn base_response() -> Response {
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/json"),
                (
                    HeaderName::from_static("docker-distribution-api-version"),
                    "registry/2.0",
                ),
            ],
            "{}",
        )
            .into_response()
    }

    fn upstream_url(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.upstream.clone();
        url.set_path(&rewrite_path(path, &self.namespace));
        url.set_query(query);
        url
    }

    /// Forward one registry request upstream and stream the answer back
    pub async fn forward(&self, request: Request) -> Result<Response, ServerError> {
        let started = Instant::now();
        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();
        let upstream_url = self.upstream_url(&path, parts.uri.query());
        let manifest = is_manifest_path(&path);

        let mut headers = HeaderMap::new();
        for name in FORWARDED_REQUEST_HEADERS.iter() {
            if let Some(value) = parts.headers.get(name) {
                headers.insert(name.clone(), value.clone());
            }
        }

        let injected = match (&self.tokens, self.namespace.is_empty()) {
            (Some(tokens), false) => match repository_path(&path, &self.namespace) {
                Some(repo) => {
                    let token = tokens.repo_token(&repo).await.map_err(|e| {
                        ServerError::bad_gateway_anyhow(e.into(), "Authentication error")
                            .with_context("repository", repo.clone())
                    })?;
                    let value = HeaderValue::from_str(&format!("Bearer {}", token))
                        .server_err(StatusCode::BAD_GATEWAY, "Authentication error")?;
                    headers.insert(header::AUTHORIZATION, value);
                    true
                }
                None => false,
            },
            _ => false,
        };
        if !injected {
            if let Some(value) = parts.headers.get(header::AUTHORIZATION) {
                headers.insert(header::AUTHORIZATION, value.clone());
            }
        }

        let content_length = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let chunked = parts.headers.contains_key(header::TRANSFER_ENCODING);

        if manifest {
            tracing::info!(
                method = %parts.method,
                path = %path,
                upstream = %upstream_url,
                content_length = ?content_length,
                content_type = ?parts.headers.get(header::CONTENT_TYPE),
                "Proxying manifest request"
            );
        } else {
            tracing::debug!(
                method = %parts.method,
                path = %path,
                upstream = %upstream_url,
                "Proxying registry request"
            );
        }

        let mut builder = self
            .http
            .request(parts.method.clone(), upstream_url.clone())
            .headers(headers);

        // Stream the body as-is; the explicit Content-Length header keeps
        // hyper from switching to chunked encoding
        if content_length.is_some_and(|n| n > 0) || chunked {
            builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = builder.send().await.map_err(|e| {
            ServerError::bad_gateway_anyhow(e.into(), "Upstream error")
                .with_context("path", path.clone())
        })?;

        let status = upstream.status();
        if status == StatusCode::UNAUTHORIZED {
            if let Some(challenge) = upstream.headers().get(header::WWW_AUTHENTICATE) {
                tracing::info!(challenge = ?challenge, path = %path, "Upstream auth challenge");
            }
        }

        let mut response_headers = HeaderMap::new();
        for name in FORWARDED_RESPONSE_HEADERS.iter() {
            if let Some(value) = upstream.headers().get(name) {
                response_headers.insert(name.clone(), value.clone());
            }
        }
        if let Some(location) = upstream
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
        {
            let rewritten = rewrite_location(location, &self.upstream_origin);
            if rewritten != location {
                if let Ok(value) = HeaderValue::from_str(&rewritten) {
                    response_headers.insert(header::LOCATION, value);
                }
            }
        }

        let mut transfer = TransferLog {
            method: parts.method.to_string(),
            path,
            status: status.as_u16(),
            manifest,
            started,
            bytes: 0,
        };
        // The stream owns the guard, so it logs once the body is done
        let stream = upstream.bytes_stream().map(move |chunk| {
            let transfer = &mut transfer;
            if let Ok(bytes) = &chunk {
                transfer.bytes += bytes.len() as u64;
            }
            chunk
        });

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Logs a completed (or abandoned) transfer when the response stream is dropped
struct TransferLog {
    method: String,
    path: String,
    status: u16,
    manifest: bool,
    started: Instant,
    bytes: u64,
}

impl Drop for TransferLog {
    fn drop(&mut self) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        if self.status >= 400 {
            tracing::warn!(
                method = %self.method,
                path = %self.path,
                status = self.status,
                bytes = self.bytes,
                duration_ms,
                manifest = self.manifest,
                "Registry request failed upstream"
            );
        } else {
            tracing::info!(
                method = %self.method,
                path = %self.path,
                status = self.status,
                bytes = self.bytes,
                duration_ms,
                manifest = self.manifest,
                "Registry request completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_path_inserts_namespace() {
        assert_eq!(
            rewrite_path("/v2/blog/manifests/latest", "acme"),
            "/v2/acme/blog/manifests/latest"
        );
        assert_eq!(
            rewrite_path("/v2/blog/blobs/uploads/", "acme"),
            "/v2/acme/blog/blobs/uploads/"
        );
    }

    #[test]
    fn test_rewrite_path_is_idempotent() {
        let once = rewrite_path("/v2/blog/tags/list", "acme");
        assert_eq!(rewrite_path(&once, "acme"), once);
        assert_eq!(
            rewrite_path("/v2/acme/blog/tags/list", "acme"),
            "/v2/acme/blog/tags/list"
        );
    }

    #[test]
    fn test_rewrite_path_leaves_other_paths() {
        assert_eq!(rewrite_path("/v2/blog/tags/list", ""), "/v2/blog/tags/list");
        assert_eq!(rewrite_path("/v2/", "acme"), "/v2/");
        assert_eq!(rewrite_path("/health", "acme"), "/health");
        // A repository merely starting with the namespace still gets prefixed
        assert_eq!(
            rewrite_path("/v2/acmeblog/tags/list", "acme"),
            "/v2/acme/acmeblog/tags/list"
        );
    }

    #[test]
    fn test_repository_path() {
        assert_eq!(
            repository_path("/v2/blog/manifests/latest", "acme").as_deref(),
            Some("acme/blog")
        );
        assert_eq!(
            repository_path("/v2/acme/blog/blobs/sha256:abc", "acme").as_deref(),
            Some("acme/blog")
        );
        assert_eq!(repository_path("/v2/", "acme"), None);
        assert_eq!(repository_path("/v2/acme/", "acme"), None);
        assert_eq!(repository_path("/other", "acme"), None);
        assert_eq!(
            repository_path("/v2/blog/tags/list", "").as_deref(),
            Some("blog")
        );
    }

    #[test]
    fn test_rewrite_location() {
        let origin = "https://registry.example.com";
        assert_eq!(
            rewrite_location(
                "https://registry.example.com/v2/acme/blog/blobs/uploads/u1?_state=x",
                origin
            ),
            "/v2/acme/blog/blobs/uploads/u1?_state=x"
        );
        assert_eq!(
            rewrite_location("/v2/acme/blog/blobs/uploads/u1", origin),
            "/v2/acme/blog/blobs/uploads/u1"
        );
        assert_eq!(
            rewrite_location("https://cdn.example.net/blob?sig=abc", origin),
            "https://cdn.example.net/blob?sig=abc"
        );
        assert_eq!(
            rewrite_location("https://registry.example.com.evil.net/x", origin),
            "https://registry.example.com.evil.net/x"
        );
    }

    #[test]
    fn test_upstream_url_keeps_query() {
        let proxy = RegistryProxy::new(
            Url::parse("https://registry.example.com").unwrap(),
            "acme".to_string(),
            None,
        )
        .unwrap();
        let url = proxy.upstream_url("/v2/blog/tags/list", Some("n=10&last=v1"));
        assert_eq!(
            url.as_str(),
            "https://registry.example.com/v2/acme/blog/tags/list?n=10&last=v1"
        );
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_transfer_logged_after_body_is_streamed() {
        use http_body_util::BodyExt;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/acme/blog/blobs/sha256:abc"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let proxy =
            RegistryProxy::new(Url::parse(&server.uri()).unwrap(), "acme".to_string(), None)
                .unwrap();
        let request = axum::http::Request::builder()
            .uri("/v2/blog/blobs/sha256:abc")
            .body(Body::empty())
            .unwrap();
        let response = proxy.forward(request).await.unwrap();
        assert!(!logs.text().contains("Registry request completed"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.len(), 4096);

        let text = logs.text();
        assert!(text.contains("Registry request completed"));
        assert!(text.contains("bytes=4096"));
    }
}
