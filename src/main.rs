use anyhow::{Context, Result};
use clap::Parser;
use site_operator::server::{self, settings::Settings};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Registry proxy and sites API for the platform
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory with default/<run mode>/local config files
    #[arg(long, env = "OPERATOR_CONFIG_DIR")]
    config_dir: Option<String>,
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
    /// Public hostname of this operator (e.g. registry.example.com)
    #[arg(long)]
    host: Option<String>,
    /// Upstream registry to proxy
    #[arg(short, long)]
    upstream: Option<String>,
    /// Registry namespace images are stored under
    #[arg(short, long)]
    registry: Option<String>,
    /// Serve HTTPS
    #[arg(long)]
    tls: bool,
    /// TLS certificate file (self-signed one generated when empty)
    #[arg(long)]
    cert: Option<String>,
    /// TLS private key file (self-signed one generated when empty)
    #[arg(long)]
    key: Option<String>,
}

impl Cli {
    /// Apply command line flags on top of the loaded settings
    fn apply(self, mut settings: Settings) -> Settings {
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(host) = self.host {
            settings.server.public_host = host;
        }
        if let Some(upstream) = self.upstream {
            settings.registry.upstream = upstream;
        }
        if let Some(registry) = self.registry {
            settings.registry.namespace = registry;
        }
        if self.tls {
            settings.tls.enabled = true;
        }
        if let Some(cert) = self.cert {
            settings.tls.cert = cert;
        }
        if let Some(key) = self.key {
            settings.tls.key = key;
        }
        settings
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "site_operator=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let settings = match &cli.config_dir {
        Some(dir) => {
            let run_mode = std::env::var("OPERATOR_CONFIG_RUN_MODE")
                .unwrap_or_else(|_| "development".into());
            Settings::load(dir, &run_mode)
        }
        None => Settings::new(),
    }
    .context("Failed to load configuration")?;

    let settings = cli.apply(settings);
    settings.validate().context("Invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = settings.server.port,
        upstream = %settings.registry.upstream,
        namespace = %settings.registry.namespace,
        tls = settings.tls.enabled,
        "Starting site operator"
    );

    server::run_server(settings).await
}
