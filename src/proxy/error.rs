//! Error types and response handling for the proxy server.
//!
//! Provides structured error classification, HTTP status code mapping,
//! and JSON error response generation.

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::proxy::thinking::RecoveryError;

/// Errors that can occur during proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Backend not found in configuration
    #[error("Backend '{backend}' not found")]
    BackendNotFound { backend: String },

    /// Backend exists but is not properly configured
    #[error("Backend '{backend}' not configured: {reason}")]
    BackendNotConfigured { backend: String, reason: String },

    /// Failed to connect to upstream server
    #[error("Connection failed to '{backend}': {source}")]
    ConnectionError {
        backend: String,
        #[source]
        source: reqwest::Error,
    },

    /// Upstream did not answer within the request timeout
    #[error("Request timeout after {duration}s")]
    RequestTimeout { duration: u64 },

    /// Client went away or the request was aborted before completion
    #[error("Request cancelled")]
    Cancelled,

    /// Invalid request format or parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// HTTP error from request building
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<axum::http::Error> for ProxyError {
    fn from(err: axum::http::Error) -> Self {
        ProxyError::Http(err.to_string())
    }
}

impl From<RecoveryError<ProxyError>> for ProxyError {
    fn from(err: RecoveryError<ProxyError>) -> Self {
        match err {
            RecoveryError::Cancelled => ProxyError::Cancelled,
            RecoveryError::Transport(err) => err,
        }
    }
}

impl ProxyError {
    /// Map error variant to appropriate HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::BackendNotFound { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::BackendNotConfigured { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::ConnectionError { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::RequestTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error type string for JSON responses
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::BackendNotFound { .. } => "backend_not_found",
            ProxyError::BackendNotConfigured { .. } => "backend_not_configured",
            ProxyError::ConnectionError { .. } => "connection_error",
            ProxyError::RequestTimeout { .. } => "request_timeout",
            ProxyError::Cancelled => "request_cancelled",
            ProxyError::InvalidRequest(_) => "invalid_request",
            ProxyError::Internal(_) => "internal_error",
            ProxyError::Http(_) => "http_error",
        }
    }
}

/// Builder for standardized error responses
pub struct ErrorResponse;

impl ErrorResponse {
    /// Create a JSON error response from a ProxyError
    pub fn from_error(err: &ProxyError, request_id: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": err.error_type(),
                "message": err.to_string(),
                "request_id": request_id
            }
        });

        (
            err.status_code(),
            [(CONTENT_TYPE, "application/json")],
            Body::from(body.to_string()),
        )
            .into_response()
    }
}
