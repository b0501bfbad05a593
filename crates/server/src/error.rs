//! Structured errors for the harbor proxy.
//!
//! Every error becomes a plain-text response whose body starts with the
//! error code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use harbor_core::Error;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The request could not be turned into something the worker understands.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Error raised by the worker or the network client.
    #[error(transparent)]
    Worker(#[from] Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ProxyError::Worker(e) if e.is_network() => StatusCode::BAD_GATEWAY,
            ProxyError::Worker(Error::SsrfBlocked(_)) => StatusCode::FORBIDDEN,
            ProxyError::Worker(Error::InvalidInput(_) | Error::InvalidUrl(_)) => StatusCode::BAD_REQUEST,
            ProxyError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("request failed: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}
