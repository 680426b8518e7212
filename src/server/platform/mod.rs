pub mod client;
pub mod error;
pub mod models;

pub use client::{encode_repository, PlatformClient};
pub use error::PlatformError;
