pub mod deployment;
pub mod domain;
pub mod error;
pub mod platform;
pub mod registry;
pub mod settings;
pub mod sites;
pub mod state;
pub mod tls;

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use registry::retention::RetentionPolicy;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the full HTTP router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_info))
        .route("/health", get(health_check))
        .route("/version", get(version_info))
        .merge(registry::routes::routes())
        .merge(sites::routes::routes())
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Start the background jobs that have what they need configured
fn spawn_background_jobs(state: &AppState) -> Vec<tokio::task::JoinHandle<()>> {
    let settings = &state.settings;
    let mut handles = vec![];

    let platform_token = settings.platform.token.clone();
    let namespace = settings.registry.namespace.clone();

    if !settings.retention.enabled {
        info!("Registry pruning disabled");
    } else if platform_token.is_empty() || namespace.is_empty() {
        info!("Registry pruning needs a platform token and registry namespace, not starting");
    } else {
        info!("Starting registry pruner");
        let pruner = registry::Pruner::new(
            state.platform.clone(),
            platform_token.clone(),
            namespace,
            RetentionPolicy {
                keep_latest: settings.retention.keep_latest,
                depth: settings.retention.depth,
            },
        )
        .with_schedule(
            Duration::from_secs(settings.retention.initial_delay_secs),
            Duration::from_secs(settings.retention.interval_secs),
        );
        handles.push(Arc::new(pruner).start());
    }

    match &state.dns_provider {
        Some(provider) if !platform_token.is_empty() => {
            info!("Starting DNS sync loop");
            let sync = domain::DnsSyncLoop::new(
                state.platform.clone(),
                platform_token,
                provider.clone(),
            )
            .with_schedule(
                Duration::from_secs(settings.dns_sync.interval_secs),
                Duration::from_secs(settings.dns_sync.recent_window_secs),
            );
            handles.push(Arc::new(sync).start());
        }
        Some(_) => info!("DNS sync needs a platform token, not starting"),
        None => info!("No DNS token configured, DNS sync disabled"),
    }

    handles
}

/// Run the HTTP server process with its background jobs
pub async fn run_server(settings: settings::Settings) -> Result<()> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let tls_settings = settings.tls.clone();
    let public_host = settings.server.public_host.clone();

    let state = AppState::new(settings)?;
    let background = spawn_background_jobs(&state);
    let app = build_router(state);

    if tls_settings.enabled {
        let files = tls::ensure_tls_files(&tls_settings)?;
        let config = axum_server::tls_openssl::OpenSSLConfig::from_pem_file(&files.cert, &files.key)
            .with_context(|| format!("Failed to load TLS certificate {}", files.cert.display()))?;

        let socket_addr = tokio::net::lookup_host(&addr)
            .await?
            .next()
            .with_context(|| format!("Could not resolve listen address {}", addr))?;

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        info!(public_host = %public_host, "HTTPS server listening on https://{}", socket_addr);
        axum_server::bind_openssl(socket_addr, config)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        info!(public_host = %public_host, "HTTP server listening on http://{}", addr);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        // Graceful shutdown support
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    info!("HTTP server shutdown complete");

    for handle in background {
        handle.abort();
    }

    Ok(())
}

async fn root_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": state.settings.server.service_name,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": state.settings.server.service_name,
        "status": "ok",
    }))
}

async fn version_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Wait for a shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
