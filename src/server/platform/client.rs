use std::time::Duration;

use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::error::PlatformError;
use super::models::{
    App, AppEnvelope, AppSpec, AppsPage, Deployment, DeploymentEnvelope, DockerConfig,
    GarbageCollection, Links, RegistryToken, RepositoriesPage, Repository, RepositoryTag,
    TagsPage,
};

const PAGE_SIZE: usize = 200;

/// Encode a repository path for use as a single URL path segment
pub fn encode_repository(repo: &str) -> String {
    repo.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("%2F")
}

/// Typed client for the cloud platform API (apps, deployments, container registry)
///
/// Every call takes the bearer token explicitly: the sites API acts with the
/// caller's token while the background jobs use the operator's own.
#[derive(Clone)]
pub struct PlatformClient {
    http: reqwest::Client,
    base_url: String,
}

impl PlatformClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, token: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token)
    }

    /// Send a request and turn non-2xx answers into `PlatformError::Api`
    async fn send(&self, builder: RequestBuilder) -> Result<Response, PlatformError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = status.as_u16(), body = %body, "Platform API error response");
        Err(PlatformError::Api { status, body })
    }

    async fn decode<T: DeserializeOwned>(
        response: Response,
        what: &'static str,
    ) -> Result<T, PlatformError> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|source| PlatformError::Decode { what, source })
    }

    // -----------------------------------------------------------------------
    // Apps
    // -----------------------------------------------------------------------

    /// List every app, following pagination
    pub async fn list_apps(&self, token: &str) -> Result<Vec<App>, PlatformError> {
        let mut apps = Vec::new();
        let mut page = 1;

        loop {
            let response = self
                .send(
                    self.request(Method::GET, "/apps", token)
                        .query(&[("page", page), ("per_page", PAGE_SIZE)]),
                )
                .await?;
            let batch: AppsPage = Self::decode(response, "app list").await?;
            let count = batch.apps.len();
            apps.extend(batch.apps);

            if count == 0 || !Links::has_next(&batch.links) {
                break;
            }
            page += 1;
        }

        Ok(apps)
    }

    pub async fn get_app(&self, token: &str, app_id: &str) -> Result<App, PlatformError> {
        let response = self
            .send(self.request(Method::GET, &format!("/apps/{}", app_id), token))
            .await?;
        let envelope: AppEnvelope = Self::decode(response, "app").await?;
        Ok(envelope.app)
    }

    pub async fn create_app(&self, token: &str, spec: &AppSpec) -> Result<App, PlatformError> {
        let response = self
            .send(
                self.request(Method::POST, "/apps", token)
                    .json(&serde_json::json!({ "spec": spec })),
            )
            .await?;
        let envelope: AppEnvelope = Self::decode(response, "created app").await?;
        Ok(envelope.app)
    }

    pub async fn delete_app(&self, token: &str, app_id: &str) -> Result<(), PlatformError> {
        self.send(self.request(Method::DELETE, &format!("/apps/{}", app_id), token))
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Deployments
    // -----------------------------------------------------------------------

    pub async fn create_deployment(
        &self,
        token: &str,
        app_id: &str,
        force_build: bool,
    ) -> Result<Deployment, PlatformError> {
        let response = self
            .send(
                self.request(Method::POST, &format!("/apps/{}/deployments", app_id), token)
                    .json(&serde_json::json!({ "force_build": force_build })),
            )
            .await?;
        let envelope: DeploymentEnvelope = Self::decode(response, "deployment").await?;
        Ok(envelope.deployment)
    }

    pub async fn get_deployment(
        &self,
        token: &str,
        app_id: &str,
        deployment_id: &str,
    ) -> Result<Deployment, PlatformError> {
        let path = format!("/apps/{}/deployments/{}", app_id, deployment_id);
        let response = self.send(self.request(Method::GET, &path, token)).await?;
        let envelope: DeploymentEnvelope = Self::decode(response, "deployment").await?;
        Ok(envelope.deployment)
    }

    // -----------------------------------------------------------------------
    // Container registry
    // -----------------------------------------------------------------------

    /// Fetch a docker `config.json` with read/write credentials for the registry
    pub async fn docker_credentials(&self, token: &str) -> Result<DockerConfig, PlatformError> {
        let response = self
            .send(
                self.request(Method::GET, "/registry/docker-credentials", token)
                    .query(&[("read_write", "true")]),
            )
            .await?;
        Self::decode(response, "docker credentials").await
    }

    /// Exchange a basic-auth registry secret for a scoped bearer token
    pub async fn registry_token(
        &self,
        basic_secret: &str,
        service: &str,
        scope: &str,
    ) -> Result<RegistryToken, PlatformError> {
        let response = self
            .send(
                self.http
                    .get(format!("{}/registry/auth", self.base_url))
                    .header(header::AUTHORIZATION, format!("Basic {}", basic_secret))
                    .query(&[("service", service), ("scope", scope)]),
            )
            .await?;
        Self::decode(response, "registry token").await
    }

    pub async fn list_repositories(
        &self,
        token: &str,
        registry: &str,
    ) -> Result<Vec<Repository>, PlatformError> {
        let path = format!("/registry/{}/repositoriesV2", registry);
        let mut repositories = Vec::new();
        let mut page = 1;

        loop {
            let response = self
                .send(
                    self.request(Method::GET, &path, token)
                        .query(&[("page", page), ("per_page", PAGE_SIZE)]),
                )
                .await?;
            let batch: RepositoriesPage = Self::decode(response, "repository list").await?;
            let count = batch.repositories.len();
            repositories.extend(batch.repositories);

            if count == 0 || !Links::has_next(&batch.links) {
                break;
            }
            page += 1;
        }

        Ok(repositories)
    }

    pub async fn list_tags(
        &self,
        token: &str,
        registry: &str,
        repository: &str,
    ) -> Result<Vec<RepositoryTag>, PlatformError> {
        let path = format!(
            "/registry/{}/repositories/{}/tags",
            registry,
            encode_repository(repository)
        );
        let mut tags = Vec::new();
        let mut page = 1;

        loop {
            let response = self
                .send(
                    self.request(Method::GET, &path, token)
                        .query(&[("page", page), ("per_page", PAGE_SIZE)]),
                )
                .await?;
            let batch: TagsPage = Self::decode(response, "tag list").await?;
            let count = batch.tags.len();
            tags.extend(batch.tags);

            if count == 0 || !Links::has_next(&batch.links) {
                break;
            }
            page += 1;
        }

        Ok(tags)
    }

    pub async fn delete_repository(
        &self,
        token: &str,
        registry: &str,
        repository: &str,
    ) -> Result<(), PlatformError> {
        let path = format!(
            "/registry/{}/repositories/{}",
            registry,
            encode_repository(repository)
        );
        self.send(self.request(Method::DELETE, &path, token)).await?;
        Ok(())
    }

    pub async fn delete_tag(
        &self,
        token: &str,
        registry: &str,
        repository: &str,
        tag: &str,
    ) -> Result<(), PlatformError> {
        let path = format!(
            "/registry/{}/repositories/{}/tags/{}",
            registry,
            encode_repository(repository),
            urlencoding::encode(tag)
        );
        self.send(self.request(Method::DELETE, &path, token)).await?;
        Ok(())
    }

    /// Request registry garbage collection. A collection that is already
    /// running (409) counts as success.
    pub async fn start_garbage_collection(
        &self,
        token: &str,
        registry: &str,
    ) -> Result<GarbageCollection, PlatformError> {
        let path = format!("/registry/{}/garbage-collection", registry);
        match self.send(self.request(Method::POST, &path, token)).await {
            Ok(_) => Ok(GarbageCollection::Started),
            Err(PlatformError::Api { status, .. }) if status == StatusCode::CONFLICT => {
                Ok(GarbageCollection::AlreadyRunning)
            }
            Err(e) => Err(e),
        }
    }
}
