use std::time::Duration;

use async_trait::async_trait;
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, HOST};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use bytes::Bytes;
use reqwest::Client;
use tokio::time::timeout;

use crate::config::{build_auth_header, Backend};
use crate::proxy::error::ProxyError;
use crate::proxy::thinking::{Transport, UpstreamBody, UpstreamResponse};

const STREAM_GENERATE: &str = ":streamGenerateContent";
const GENERATE: &str = ":generateContent";

/// Forwards one client request to a backend.
///
/// Built per request and reused for the retry, so both attempts carry the
/// same method, path and headers and only the body differs.
#[derive(Clone)]
pub struct UpstreamTransport {
    client: Client,
    backend: Backend,
    method: Method,
    path_and_query: String,
    headers: HeaderMap,
    timeout: Duration,
    buffer_success: bool,
}

impl UpstreamTransport {
    pub fn new(
        client: Client,
        backend: Backend,
        method: Method,
        path_and_query: impl Into<String>,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            backend,
            method,
            path_and_query: path_and_query.into(),
            headers: forwarded_headers(headers),
            timeout,
            buffer_success: false,
        }
        .with_backend_auth()
    }

    /// Transport for the non-streaming variant of this request.
    ///
    /// Gemini's streaming endpoint is swapped for `:generateContent` and the
    /// `alt` parameter dropped. Successful bodies are buffered.
    pub fn non_streaming(&self) -> Self {
        let (path, query) = match self.path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.path_and_query.as_str(), None),
        };
        let path = path.replace(STREAM_GENERATE, GENERATE);
        let query: Vec<&str> = query
            .map(|q| q.split('&').filter(|kv| !kv.starts_with("alt=")).collect())
            .unwrap_or_default();

        let path_and_query = if query.is_empty() {
            path
        } else {
            format!("{}?{}", path, query.join("&"))
        };

        Self {
            path_and_query,
            buffer_success: true,
            ..self.clone()
        }
    }

    pub fn url(&self) -> String {
        format!(
            "{}{}",
            self.backend.base_url.trim_end_matches('/'),
            self.path_and_query
        )
    }

    fn with_backend_auth(mut self) -> Self {
        if let Some((name, value)) = build_auth_header(&self.backend) {
            self.headers.remove(AUTHORIZATION);
            self.headers.remove("x-api-key");
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    self.headers.insert(name, value);
                }
                _ => tracing::warn!(backend = %self.backend.name, "Invalid auth header for backend"),
            }
        }
        self
    }

    async fn do_send(&self, payload: Bytes) -> Result<UpstreamResponse, ProxyError> {
        let upstream_resp = self
            .client
            .request(self.method.clone(), self.url())
            .headers(self.headers.clone())
            .body(payload)
            .send()
            .await
            .map_err(|e| ProxyError::ConnectionError {
                backend: self.backend.name.clone(),
                source: e,
            })?;

        let status = upstream_resp.status();
        let headers = upstream_resp.headers().clone();

        let body = if status.is_success() && !self.buffer_success {
            UpstreamBody::Streaming(Box::pin(upstream_resp.bytes_stream()))
        } else {
            let bytes = upstream_resp
                .bytes()
                .await
                .map_err(|e| ProxyError::ConnectionError {
                    backend: self.backend.name.clone(),
                    source: e,
                })?;
            UpstreamBody::Buffered(bytes)
        };

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for UpstreamTransport {
    type Error = ProxyError;

    /// The timeout covers connecting, response headers and buffered bodies.
    /// Streaming bodies are not bounded by it.
    async fn send(&self, payload: Bytes) -> Result<UpstreamResponse, ProxyError> {
        match timeout(self.timeout, self.do_send(payload)).await {
            Ok(response) => response,
            Err(_) => Err(ProxyError::RequestTimeout {
                duration: self.timeout.as_secs(),
            }),
        }
    }
}

fn forwarded_headers(mut headers: HeaderMap) -> HeaderMap {
    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);
    headers
}
