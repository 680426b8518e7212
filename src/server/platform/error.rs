use thiserror::Error;

/// Errors returned by the platform API client
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The request never produced a response (connect, TLS, body read)
    #[error("platform request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("platform API returned {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },

    /// The API answered 2xx but the body did not match the expected shape
    #[error("failed to decode {what} response: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl PlatformError {
    /// HTTP status of an API error, if this is one
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            PlatformError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for 401/403 answers
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self.status(),
            Some(reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN)
        )
    }
}
