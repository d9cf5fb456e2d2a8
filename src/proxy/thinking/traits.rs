//! The seam between the recovery orchestrator and whatever performs the
//! upstream call.

use std::pin::Pin;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use futures_core::Stream;

/// Body stream of a successful streaming response.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// One upstream call with a fully serialized payload.
///
/// Implementations must be safe to call twice for the same logical request:
/// the orchestrator issues the retry through the same transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Network or protocol failure. Passed through the orchestrator untouched.
    type Error: std::error::Error + Send + Sync + 'static;

    async fn send(&self, payload: Bytes) -> Result<UpstreamResponse, Self::Error>;
}

/// Upstream response as seen by the orchestrator.
///
/// Error bodies are expected to be [`UpstreamBody::Buffered`]: a 400 with a
/// streaming body is never classified and passes through as-is.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

pub enum UpstreamBody {
    Buffered(Bytes),
    Streaming(ByteStream),
}

impl std::fmt::Debug for UpstreamBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamBody::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            UpstreamBody::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

impl UpstreamResponse {
    /// Response with an in-memory body and no headers.
    pub fn buffered(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: UpstreamBody::Buffered(body.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The body, if it was buffered.
    pub fn buffered_body(&self) -> Option<&Bytes> {
        match &self.body {
            UpstreamBody::Buffered(bytes) => Some(bytes),
            UpstreamBody::Streaming(_) => None,
        }
    }
}
