use super::handlers;
use crate::server::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/sites",
            get(handlers::list_sites).post(handlers::create_site),
        )
        .route(
            "/sites/{name}",
            get(handlers::get_site).delete(handlers::delete_site),
        )
        .route("/sites/{name}/deploy", post(handlers::deploy_site))
}
