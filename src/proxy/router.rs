use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ConfigStore;
use crate::proxy::error::{ErrorResponse, ProxyError};
use crate::proxy::health::health;
use crate::proxy::thinking::{
    build_final_only_stream, clone_request_without_stream, is_stream_request,
    should_fallback_to_non_stream, strip_all_thinking, SignatureRecovery, StreamFormat,
    Transport, UpstreamBody, UpstreamResponse,
};
use crate::proxy::upstream::UpstreamTransport;

/// Shared per-server state handed to every request.
#[derive(Clone)]
pub struct RouterEngine {
    config: ConfigStore,
    client: Client,
    recovery: SignatureRecovery,
}

pub fn build_router(engine: RouterEngine) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(proxy_handler)
        .with_state(engine)
}

async fn proxy_handler(State(engine): State<RouterEngine>, req: Request<Body>) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        match engine.forward(req).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "Request failed");
                ErrorResponse::from_error(&err, &request_id)
            }
        }
    }
    .instrument(span)
    .await
}

impl RouterEngine {
    pub fn new(config: ConfigStore, client: Client, recovery: SignatureRecovery) -> Self {
        Self {
            config,
            client,
            recovery,
        }
    }

    /// Forward a client request to the active backend.
    pub async fn forward(&self, req: Request<Body>) -> Result<Response, ProxyError> {
        // The whole request, retry included, uses one config snapshot.
        let config = self.config.get();
        let backend = config
            .active_backend()
            .cloned()
            .ok_or_else(|| ProxyError::BackendNotFound {
                backend: config.defaults.active.clone(),
            })?;

        if !backend.is_configured() {
            return Err(ProxyError::BackendNotConfigured {
                backend: backend.name.clone(),
                reason: "api_key is not set".to_string(),
            });
        }

        let (parts, body) = req.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| ProxyError::InvalidRequest(format!("Failed to read request body: {}", e)))?
            .to_bytes();

        let path = parts.uri.path().to_string();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();
        let alt = query_param(parts.uri.query(), "alt");
        let provider = backend.provider;

        let transport = UpstreamTransport::new(
            self.client.clone(),
            backend,
            parts.method,
            path_and_query,
            parts.headers,
            Duration::from_secs(u64::from(config.defaults.timeout_seconds)),
        );

        let payload = is_chat_completion_path(&path)
            .then(|| serde_json::from_slice::<Value>(&body).ok())
            .flatten();
        let Some(payload) = payload else {
            let response = transport.send(body).await?;
            return into_response(response);
        };

        // Dropped with this future when the client disconnects.
        let cancel = CancellationToken::new();
        let _disconnect = cancel.clone().drop_guard();

        let recovered = self.recovery.execute(&transport, body, &cancel).await?;
        let report = &recovered.report;
        if report.outcome.retried() || report.pre_sanitized {
            tracing::info!(
                outcome = %report.outcome,
                pre_sanitized = report.pre_sanitized,
                signature_recorded = report.signature_recorded,
                status = %recovered.response.status,
                "Thinking signature recovery applied"
            );
        }

        let response = recovered.response;
        let wants_stream = is_stream_request(&payload) || path.contains(":streamGenerateContent");
        let still_rejected = response
            .buffered_body()
            .is_some_and(|body| should_fallback_to_non_stream(response.status, body));

        if wants_stream && still_rejected && config.defaults.stream_fallback {
            let format = StreamFormat::for_provider(provider, alt.as_deref());
            return self
                .stream_fallback(&transport, &payload, format, &cancel)
                .await;
        }

        into_response(response)
    }

    /// Redo a streaming request as one non-streaming call with every thinking
    /// block stripped, and replay the result as a stream.
    async fn stream_fallback(
        &self,
        transport: &UpstreamTransport,
        payload: &Value,
        format: StreamFormat,
        cancel: &CancellationToken,
    ) -> Result<Response, ProxyError> {
        let mut body = if is_stream_request(payload) {
            clone_request_without_stream(payload)
        } else {
            payload.clone()
        };
        let stripped = strip_all_thinking(&mut body);
        let body = serde_json::to_vec(&body)
            .map_err(|e| ProxyError::Internal(format!("Failed to encode fallback request: {}", e)))?;

        tracing::warn!(
            replaced = stripped.replaced,
            ?format,
            "Streaming request still rejected on thinking signature, retrying without streaming"
        );

        let transport = transport.non_streaming();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProxyError::Cancelled),
            result = transport.send(Bytes::from(body)) => result?,
        };

        if !response.is_success() {
            return into_response(response);
        }

        let body = response.buffered_body().cloned().unwrap_or_default();
        let stream = build_final_only_stream(format, &body);

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, format.content_type())
            .header(CACHE_CONTROL, "no-cache")
            .body(Body::from(stream))?)
    }
}

/// Endpoints whose bodies carry conversation history.
pub fn is_chat_completion_path(path: &str) -> bool {
    path.ends_with("/messages")
        || path.ends_with("/chat/completions")
        || path.contains(":generateContent")
        || path.contains(":streamGenerateContent")
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

fn into_response(upstream: UpstreamResponse) -> Result<Response, ProxyError> {
    let mut builder = Response::builder().status(upstream.status);

    for (name, value) in upstream.headers.iter() {
        if name != CONTENT_LENGTH && name != TRANSFER_ENCODING && name != CONNECTION {
            builder = builder.header(name, value);
        }
    }

    let body = match upstream.body {
        UpstreamBody::Buffered(bytes) => Body::from(bytes),
        UpstreamBody::Streaming(stream) => Body::from_stream(stream),
    };

    Ok(builder.body(body)?)
}
