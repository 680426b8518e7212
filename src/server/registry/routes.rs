use super::handlers;
use crate::server::state::AppState;
use axum::{routing::any, Router};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v2", any(handlers::base))
        .route("/v2/", any(handlers::base))
        .route("/v2/{*path}", any(handlers::proxy))
}
