use serde::{Deserialize, Serialize};

/// Cloudflare API response envelope
#[derive(Debug, Deserialize)]
pub struct CloudflareResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<CloudflareError>,
    pub result: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct CloudflareError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct Zone {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// DNS record as sent to and returned by Cloudflare
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DnsRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    /// 1 means automatic
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub proxied: bool,
}

fn default_ttl() -> u32 {
    1
}

impl DnsRecord {
    pub fn cname(name: &str, target: &str) -> Self {
        Self {
            id: String::new(),
            record_type: "CNAME".to_string(),
            name: name.to_string(),
            content: target.to_string(),
            ttl: 1,
            proxied: false,
        }
    }
}

/// What `ensure_cname` had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CnameOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Fully qualified record name for `name` within `zone`
pub fn fqdn(name: &str, zone: &str) -> String {
    let name = name.trim_end_matches('.');
    if name == zone || name.ends_with(&format!(".{}", zone)) {
        name.to_string()
    } else {
        format!("{}.{}", name, zone)
    }
}

/// Hostname part of a CNAME target (scheme and trailing slash removed)
pub fn normalize_target(target: &str) -> String {
    target
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}
