//! DNS records for site hostnames

pub mod dns_provider;
pub mod models;
pub mod sync_loop;

pub use dns_provider::{create_dns_provider, CloudflareDnsProvider, DnsProvider};
pub use models::CnameOutcome;
pub use sync_loop::DnsSyncLoop;
