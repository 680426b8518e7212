//! Sites API: create, inspect, redeploy and delete apps on the cloud platform

pub mod handlers;
pub mod models;
pub mod routes;
pub mod service;
