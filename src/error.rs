use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Errors raised while producing a playlist
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Network failure or timeout talking to the upstream service
    #[error("upstream request to {url} failed: {message}")]
    UpstreamTransport { url: String, message: String },

    /// Upstream answered with a non-2xx status
    #[error("upstream {url} responded with HTTP {status}")]
    UpstreamStatus { url: String, status: u16 },

    /// Upstream body could not be interpreted at all
    #[error("malformed upstream body from {url}: {message}")]
    MalformedUpstreamBody { url: String, message: String },

    /// Caller-supplied query parameter failed validation
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },

    /// Every source failed and there is nothing cached to fall back to
    #[error("playlist build failed: {0}")]
    CacheBuildFailure(String),

    /// Reading or writing the persisted playlist document
    #[error("playlist storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl ProxyError {
    pub fn transport(url: impl Into<String>, message: impl ToString) -> Self {
        Self::UpstreamTransport {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_parameter(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamTransport { .. }
            | ProxyError::UpstreamStatus { .. }
            | ProxyError::MalformedUpstreamBody { .. }
            | ProxyError::CacheBuildFailure(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "playlist request failed");
        } else {
            tracing::warn!(error = %self, "playlist request rejected");
        }

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
