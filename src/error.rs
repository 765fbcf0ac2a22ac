//! Proxy error types.
//!
//! Every failure on the serving path collapses into a single [`ProxyError`]
//! value returned to the HTTP handler. Nothing here is retried.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::render::RenderError;

/// Result alias used throughout the serving path.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors produced while resolving or serving an object.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Remote transport or request failure.
    #[error("upstream fetch failed: {0}")]
    Upstream(String),

    /// The origin answered a ranged fetch with something we cannot splice.
    #[error("upstream returned {status} for {url}")]
    UpstreamStatus { status: StatusCode, url: String },

    /// Failure reading an already-open local or range source.
    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),

    /// Markdown conversion or sanitization failure.
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    /// No mount or object exists at the requested path.
    #[error("not found: {0}")]
    NotFound(String),

    /// Only GET and HEAD are served.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// Server construction failed (client, mounts).
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProxyError {
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        ProxyError::Upstream(err.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            ProxyError::Upstream(_) | ProxyError::UpstreamStatus { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::Read(_) | ProxyError::Render(_) | ProxyError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        ProxyError::Upstream(err.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            // Internal details stay in the logs.
            ProxyError::Read(_) | ProxyError::Config(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}
