use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::server::platform::PlatformError;

/// Server error type that provides automatic logging and clean error responses.
///
/// This type:
/// - Automatically logs errors when converted to HTTP responses (via IntoResponse)
/// - Preserves full error chains from anyhow::Error for debugging
/// - Allows attaching structured context (site names, app IDs, etc.)
/// - Returns a `{"error": ...}` JSON envelope to clients
///
/// Upstream API errors that should reach the client untouched (status and body)
/// are carried as a passthrough instead of being wrapped in the envelope.
///
/// # Example
///
/// ```rust,ignore
/// use crate::server::error::{ServerError, ServerErrorExt};
///
/// let err = ServerError::bad_request("name is required");
///
/// let apps = platform
///     .list_apps(&token)
///     .await
///     .map_err(ServerError::from_platform)?;
///
/// let value = HeaderValue::from_str(&bearer)
///     .server_err(StatusCode::BAD_GATEWAY, "Authentication error")?;
/// ```
#[derive(Debug)]
pub struct ServerError {
    /// HTTP status code to return
    pub status: StatusCode,
    /// User-facing error message (returned in response)
    pub message: String,
    /// Internal error with full chain (logged but not exposed to client)
    pub source: Option<anyhow::Error>,
    /// Structured context for logging (key-value pairs)
    pub context: Vec<(&'static str, String)>,
    /// Raw upstream body forwarded verbatim instead of the JSON envelope
    pub passthrough_body: Option<String>,
}

impl ServerError {
    /// Create a new error with just status and message (no source error)
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            source: None,
            context: Vec::new(),
            passthrough_body: None,
        }
    }

    /// Create an error from an anyhow::Error with full error chain
    pub fn from_anyhow(
        source: anyhow::Error,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            source: Some(source),
            context: Vec::new(),
            passthrough_body: None,
        }
    }

    /// Map a platform API failure for thin pass-through routes.
    ///
    /// Non-2xx API responses keep the upstream status and body; transport and
    /// decoding failures become a 502 envelope.
    pub fn from_platform(err: PlatformError) -> Self {
        match err {
            PlatformError::Api { status, body } => {
                let status =
                    StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
                let mut server_err = Self::new(status, format!("Platform API error ({})", status));
                server_err.passthrough_body = Some(body);
                server_err
            }
            other => Self::bad_gateway_anyhow(other.into(), "Platform API request failed"),
        }
    }

    /// Wrap a platform failure in the JSON envelope, keeping the upstream status
    /// for API errors. Used where the operator adds its own logic on top.
    pub fn wrap_platform(err: PlatformError, message: impl Into<String>) -> Self {
        let message = message.into();
        match &err {
            PlatformError::Api { status, body } => {
                let status =
                    StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
                let detail = format!("{}: {}", message, body.trim());
                Self::from_anyhow(err.into(), status, detail)
            }
            _ => {
                let detail = format!("{}: {}", message, err);
                Self::bad_gateway_anyhow(err.into(), detail)
            }
        }
    }

    /// Add a context field for logging (chainable)
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Create a 500 Internal Server Error from an anyhow::Error
    pub fn internal_anyhow(source: anyhow::Error, message: impl Into<String>) -> Self {
        Self::from_anyhow(source, StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Create a 502 Bad Gateway error from an anyhow::Error
    pub fn bad_gateway_anyhow(source: anyhow::Error, message: impl Into<String>) -> Self {
        Self::from_anyhow(source, StatusCode::BAD_GATEWAY, message)
    }

    /// Create a 400 Bad Request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Create a 401 Unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// Create a 404 Not Found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // Log server errors (5xx) with full context using structured fields
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = self.status.as_u16(),
                    message = %self.message,
                    context = ?self.context,
                    error = ?source,
                    "Server error"
                );
            } else {
                tracing::error!(
                    status = self.status.as_u16(),
                    message = %self.message,
                    context = ?self.context,
                    "Server error"
                );
            }
        }

        if let Some(body) = self.passthrough_body {
            return (
                self.status,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response();
        }

        let body = Json(json!({
            "error": self.message,
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal_anyhow(err, "Internal server error")
    }
}

/// Extension trait for Result types to easily convert to ServerError
///
/// ```rust,ignore
/// use crate::server::error::ServerErrorExt;
///
/// let spec = build_spec().server_err(StatusCode::BAD_REQUEST, "Invalid site")?;
/// ```
pub trait ServerErrorExt<T> {
    /// Convert error to ServerError with custom status and message
    fn server_err(self, status: StatusCode, message: impl Into<String>) -> Result<T, ServerError>;
}

impl<T, E> ServerErrorExt<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn server_err(self, status: StatusCode, message: impl Into<String>) -> Result<T, ServerError> {
        self.map_err(|e| ServerError::from_anyhow(e.into(), status, message))
    }
}
