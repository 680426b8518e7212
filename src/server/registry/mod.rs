//! Docker registry V2 proxy, registry credentials and tag retention

pub mod credentials;
pub mod handlers;
pub mod proxy;
pub mod pruner;
pub mod retention;
pub mod routes;

pub use credentials::{CredentialCache, CredentialError, RepoTokenProvider};
pub use proxy::RegistryProxy;
pub use pruner::{PruneReport, Pruner};

/// Host key used for the registry in docker credentials and as the token
/// `service`, e.g. `registry.digitalocean.com` or `localhost:5000`.
pub fn registry_host(upstream: &url::Url) -> String {
    match (upstream.host_str(), upstream.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    }
}
