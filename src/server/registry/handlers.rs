use axum::{extract::Request, extract::State, response::Response};

use super::proxy::RegistryProxy;
use crate::server::error::ServerError;
use crate::server::state::AppState;

/// `GET /v2/` version check. Docker clients call this during `docker login`
/// and any credentials are accepted here.
pub async fn base(request: Request) -> Response {
    tracing::debug!(method = %request.method(), "Registry base check accepted");
    RegistryProxy::base_response()
}

/// Every other `/v2/*` request is forwarded upstream
pub async fn proxy(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ServerError> {
    state.registry_proxy.forward(request).await
}
