use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub tls: TlsSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub platform: PlatformSettings,
    #[serde(default)]
    pub dns: DnsSettings,
    #[serde(default)]
    pub operator: OperatorSettings,
    #[serde(default)]
    pub retention: RetentionSettings,
    #[serde(default)]
    pub dns_sync: DnsSyncSettings,
    #[serde(default)]
    pub sites: SitesSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public hostname clients use to reach the registry proxy (e.g. "registry.example.com")
    #[serde(default = "default_public_host")]
    pub public_host: String,
    /// Name reported by the health and root endpoints
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_public_host() -> String {
    "localhost:8080".to_string()
}

fn default_service_name() -> String {
    "site-operator".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_host: default_public_host(),
            service_name: default_service_name(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TlsSettings {
    #[serde(default)]
    pub enabled: bool,
    /// PEM certificate path. A self-signed certificate is generated when cert or key is empty.
    #[serde(default)]
    pub cert: String,
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistrySettings {
    /// Upstream registry (host or URL). `https://` is assumed when no scheme is given.
    #[serde(default = "default_upstream")]
    pub upstream: String,
    /// Namespace inserted after `/v2/` on every proxied path. Empty disables rewriting
    /// and token injection.
    #[serde(default)]
    pub namespace: String,
}

fn default_upstream() -> String {
    "registry.digitalocean.com".to_string()
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            upstream: default_upstream(),
            namespace: String::new(),
        }
    }
}

impl RegistrySettings {
    /// Parse the upstream registry into a URL, defaulting the scheme to https
    pub fn upstream_url(&self) -> Result<Url, ConfigError> {
        let raw = self.upstream.trim().trim_end_matches('/');
        if raw.is_empty() {
            return Err(ConfigError::Message(
                "Upstream registry not configured. Set UPSTREAM_REGISTRY or [registry] upstream"
                    .to_string(),
            ));
        }

        let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else {
            format!("https://{}", raw)
        };

        let url = Url::parse(&with_scheme).map_err(|e| {
            ConfigError::Message(format!("Invalid upstream registry '{}': {}", raw, e))
        })?;

        if url.host_str().is_none() {
            return Err(ConfigError::Message(format!(
                "Upstream registry '{}' has no host",
                raw
            )));
        }

        Ok(url)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlatformSettings {
    /// Base URL of the cloud platform API
    #[serde(default = "default_platform_api_url")]
    pub api_url: String,
    /// Default platform API token, used by the background jobs and by `/sites`
    /// requests that carry no Authorization header. Empty means callers must
    /// always bring their own token.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_instance_size")]
    pub instance_size: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_instance_count")]
    pub instance_count: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_platform_api_url() -> String {
    "https://api.digitalocean.com/v2".to_string()
}

fn default_region() -> String {
    "nyc".to_string()
}

fn default_instance_size() -> String {
    "apps-s-1vcpu-0.5gb".to_string()
}

fn default_http_port() -> u16 {
    80
}

fn default_instance_count() -> u32 {
    1
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            api_url: default_platform_api_url(),
            token: String::new(),
            region: default_region(),
            instance_size: default_instance_size(),
            http_port: default_http_port(),
            instance_count: default_instance_count(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl PlatformSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DnsSettings {
    #[serde(default = "default_dns_api_url")]
    pub api_url: String,
    /// DNS API token. DNS sync is disabled when empty.
    #[serde(default)]
    pub token: String,
    /// Managed parent zone; every site gets `<name>.<zone>` as its primary domain
    #[serde(default)]
    pub zone: String,
}

fn default_dns_api_url() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            api_url: default_dns_api_url(),
            token: String::new(),
            zone: String::new(),
        }
    }
}

/// Callback coordinates injected into every deployed site
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OperatorSettings {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetentionSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of versions kept per repository (in addition to `latest`)
    #[serde(default = "default_retention_depth")]
    pub depth: usize,
    #[serde(default = "default_true")]
    pub keep_latest: bool,
    #[serde(default = "default_retention_initial_delay")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_retention_interval")]
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_retention_depth() -> usize {
    3
}

fn default_retention_initial_delay() -> u64 {
    30
}

fn default_retention_interval() -> u64 {
    24 * 60 * 60
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            depth: default_retention_depth(),
            keep_latest: true,
            initial_delay_secs: default_retention_initial_delay(),
            interval_secs: default_retention_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DnsSyncSettings {
    /// Interval in seconds between scans for recently created apps (default: 60)
    #[serde(default = "default_dns_sync_interval")]
    pub interval_secs: u64,
    /// Apps created within this window are reconciled by the periodic scan (default: 600)
    #[serde(default = "default_dns_sync_window")]
    pub recent_window_secs: u64,
}

fn default_dns_sync_interval() -> u64 {
    60
}

fn default_dns_sync_window() -> u64 {
    600
}

impl Default for DnsSyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_dns_sync_interval(),
            recent_window_secs: default_dns_sync_window(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SitesSettings {
    #[serde(default = "default_tag_check_attempts")]
    pub tag_check_attempts: u32,
    #[serde(default = "default_tag_check_delay")]
    pub tag_check_delay_ms: u64,
    #[serde(default = "default_deployment_poll_interval")]
    pub deployment_poll_interval_ms: u64,
    #[serde(default = "default_deployment_timeout")]
    pub deployment_timeout_secs: u64,
}

fn default_tag_check_attempts() -> u32 {
    5
}

fn default_tag_check_delay() -> u64 {
    2000
}

fn default_deployment_poll_interval() -> u64 {
    3000
}

fn default_deployment_timeout() -> u64 {
    600
}

impl Default for SitesSettings {
    fn default() -> Self {
        Self {
            tag_check_attempts: default_tag_check_attempts(),
            tag_check_delay_ms: default_tag_check_delay(),
            deployment_poll_interval_ms: default_deployment_poll_interval(),
            deployment_timeout_secs: default_deployment_timeout(),
        }
    }
}

/// Well-known environment variables mapped onto configuration keys.
/// These take precedence over config files and `OPERATOR__*` variables.
const ENV_ALIASES: &[(&str, &str)] = &[
    ("PUBLIC_HOST", "server.public_host"),
    ("UPSTREAM_REGISTRY", "registry.upstream"),
    ("DEFAULT_REGISTRY", "registry.namespace"),
    ("TLS_CERT", "tls.cert"),
    ("TLS_KEY", "tls.key"),
    ("DIGITALOCEAN_TOKEN", "platform.token"),
    ("CLOUDFLARE_TOKEN", "dns.token"),
    ("OPERATOR_URL", "operator.url"),
    ("OPERATOR_TOKEN", "operator.token"),
];

fn env_var_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

impl Settings {
    /// Substitute environment variables in a string value
    /// Replaces ${VAR_NAME} or ${VAR_NAME:-default} with environment variable values
    fn substitute_env_vars_in_string(s: &str) -> String {
        lazy_static::lazy_static! {
            static ref ENV_REF: regex::Regex =
                regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
        }

        ENV_REF
            .replace_all(s, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str());

                match env::var(var_name) {
                    Ok(val) => val,
                    Err(_) => default_value.unwrap_or("").to_string(),
                }
            })
            .to_string()
    }

    /// Convert a config::Value to a serde_json::Value, performing environment variable substitution
    fn config_value_to_json(value: &config::Value) -> serde_json::Value {
        use config::ValueKind;

        match &value.kind {
            ValueKind::Nil => serde_json::Value::Null,
            ValueKind::Boolean(b) => serde_json::Value::Bool(*b),
            ValueKind::I64(i) => serde_json::Value::Number((*i).into()),
            ValueKind::I128(i) => serde_json::Value::Number((*i as i64).into()),
            ValueKind::U64(u) => serde_json::Value::Number((*u).into()),
            ValueKind::U128(u) => serde_json::Value::Number((*u as u64).into()),
            ValueKind::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueKind::String(s) => {
                // Perform environment variable substitution
                serde_json::Value::String(Self::substitute_env_vars_in_string(s))
            }
            ValueKind::Table(table) => {
                let mut map = serde_json::Map::new();
                for (k, v) in table.iter() {
                    map.insert(k.clone(), Self::config_value_to_json(v));
                }
                serde_json::Value::Object(map)
            }
            ValueKind::Array(arr) => {
                let vec: Vec<serde_json::Value> =
                    arr.iter().map(Self::config_value_to_json).collect();
                serde_json::Value::Array(vec)
            }
        }
    }

    /// Try to add a config file with multiple extension attempts (.toml, .yaml, .yml)
    /// Returns Ok(true) if a file was loaded, Ok(false) if no file found
    fn try_add_config_file(
        builder: &mut config::ConfigBuilder<config::builder::DefaultState>,
        config_dir: &str,
        name: &str,
    ) -> Result<bool, ConfigError> {
        let extensions = ["toml", "yaml", "yml"];

        for ext in extensions {
            let path = format!("{}/{}.{}", config_dir, name, ext);
            if std::path::Path::new(&path).exists() {
                tracing::info!("Loading config file: {}", path);
                *builder = builder
                    .clone()
                    .add_source(config::File::with_name(&format!("{}/{}", config_dir, name)));
                return Ok(true);
            }
        }

        tracing::debug!(
            "Optional config file not found: {}/{}.{{toml,yaml,yml}}",
            config_dir,
            name
        );
        Ok(false)
    }

    /// Load settings from `OPERATOR_CONFIG_DIR` (default: `config`) and the environment
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode =
            env::var("OPERATOR_CONFIG_RUN_MODE").unwrap_or_else(|_| "development".into());
        let config_dir = env::var("OPERATOR_CONFIG_DIR").unwrap_or_else(|_| "config".into());
        Self::load(&config_dir, &run_mode)
    }

    /// Load settings from an explicit config directory and run mode
    pub fn load(config_dir: &str, run_mode: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Config files are all optional; every field has a built-in default
        Self::try_add_config_file(&mut builder, config_dir, "default")?;
        Self::try_add_config_file(&mut builder, config_dir, run_mode)?;
        Self::try_add_config_file(&mut builder, config_dir, "local")?;

        // OPERATOR__SERVER__PORT=9000 style overrides
        builder = builder.add_source(
            Environment::with_prefix("OPERATOR")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        for (var, key) in ENV_ALIASES {
            builder = builder.set_override_option(*key, env_var_non_empty(var))?;
        }
        if let Some(port) = env_var_non_empty("PORT") {
            let port: u16 = port
                .parse()
                .map_err(|e| ConfigError::Message(format!("Invalid PORT '{}': {}", port, e)))?;
            builder = builder.set_override("server.port", port as i64)?;
        }
        // Any non-empty TLS_ENABLED other than an explicit "false"/"0" turns TLS on
        if let Some(value) = env_var_non_empty("TLS_ENABLED") {
            let enabled = !matches!(value.to_ascii_lowercase().as_str(), "false" | "0" | "no");
            builder = builder.set_override("tls.enabled", enabled)?;
        }

        let config = builder.build()?;

        let root_value = config
            .cache
            .into_table()
            .map_err(|e| ConfigError::Message(format!("Failed to get config table: {}", e)))?;

        let mut json_map = serde_json::Map::new();
        for (k, v) in root_value.iter() {
            json_map.insert(k.clone(), Self::config_value_to_json(v));
        }
        let json_value = serde_json::Value::Object(json_map);

        // Deserialize from JSON value and collect unused fields
        let mut unused_fields = Vec::new();
        let settings: Settings = serde_ignored::deserialize(json_value, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field in operator config: {}", field);
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Validate cross-field constraints that serde defaults cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.registry.upstream_url()?;

        if self.retention.depth == 0 {
            return Err(ConfigError::Message(
                "retention.depth must be at least 1".to_string(),
            ));
        }

        if !self.dns.token.is_empty() && self.dns.zone.is_empty() {
            return Err(ConfigError::Message(
                "DNS token configured but dns.zone is empty. Set [dns] zone to the managed parent zone"
                    .to_string(),
            ));
        }

        if self.sites.tag_check_attempts == 0 {
            return Err(ConfigError::Message(
                "sites.tag_check_attempts must be at least 1".to_string(),
            ));
        }

        if self.retention.interval_secs == 0 || self.dns_sync.interval_secs == 0 {
            return Err(ConfigError::Message(
                "retention.interval_secs and dns_sync.interval_secs must be positive".to_string(),
            ));
        }

        if self.sites.deployment_poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "sites.deployment_poll_interval_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
