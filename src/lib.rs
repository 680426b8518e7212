//! Registry proxy, site orchestration, DNS sync and image retention for a
//! small platform-as-a-service built on a cloud app platform.

pub mod server;
