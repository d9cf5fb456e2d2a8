//! Mock upstream provider for exercising the proxy end to end.

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response, StatusCode};
use axum::routing::any;
use axum::Router;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// A captured request for assertions.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    /// Path plus query string, as received.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("captured body is not JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A mock response to return.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self::json(r#"{"ok": true}"#)
    }
}

impl MockResponse {
    pub fn json(body: &str) -> Self {
        Self::raw(200, "application/json", body)
    }

    pub fn raw(status: u16, content_type: &str, body: &str) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: body.as_bytes().to_vec(),
        }
    }

    /// Anthropic-style error envelope.
    pub fn error(status: u16, message: &str) -> Self {
        let body = serde_json::json!({
            "type": "error",
            "error": {"type": "invalid_request_error", "message": message}
        });
        Self::raw(status, "application/json", &body.to_string())
    }

    /// 400 rejecting the thinking block at `messages.<message>.content.<content>`.
    pub fn signature_rejection(message: usize, content: usize) -> Self {
        Self::error(
            400,
            &format!(
                "messages.{}.content.{}: Invalid `signature` in `thinking` block",
                message, content
            ),
        )
    }

    /// 400 rejecting a thinking signature without saying which one.
    pub fn signature_rejection_unplaced() -> Self {
        Self::error(400, "Invalid signature in thinking block")
    }

    pub fn sse(events: &[&str]) -> Self {
        let body: String = events
            .iter()
            .map(|e| {
                // Real Anthropic streams label each frame with its type.
                let event_type = serde_json::from_str::<Value>(e)
                    .ok()
                    .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from));
                match event_type {
                    Some(t) => format!("event: {}\ndata: {}\n\n", t, e),
                    None => format!("data: {}\n\n", e),
                }
            })
            .collect();
        Self::raw(200, "text/event-stream", &body)
    }
}

#[derive(Clone, Default)]
struct MockState {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
}

/// Mock backend server for testing.
pub struct MockBackend {
    pub addr: SocketAddr,
    state: MockState,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl MockBackend {
    /// Start a new mock backend server.
    pub async fn start() -> Self {
        let state = MockState::default();
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);

        let app = Router::new()
            .route("/{*path}", any(handle_request))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            state,
            shutdown: shutdown_tx,
        }
    }

    /// Enqueue a response to be returned for the next request.
    pub fn enqueue(&self, resp: MockResponse) {
        self.state.responses.lock().push_back(resp);
    }

    /// Get all captured requests.
    pub fn captured_requests(&self) -> Vec<CapturedRequest> {
        self.state.requests.lock().clone()
    }

    /// Get the base URL for this mock server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn handle_request(State(state): State<MockState>, req: Request<Body>) -> Response<Body> {
    let method = req.method().to_string();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();
    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();

    let body = axum::body::to_bytes(req.into_body(), 1024 * 1024)
        .await
        .unwrap_or_default()
        .to_vec();

    state.requests.lock().push(CapturedRequest {
        method,
        path,
        headers,
        body,
    });

    let mock_resp = state.responses.lock().pop_front().unwrap_or_default();

    let mut builder = Response::builder().status(StatusCode::from_u16(mock_resp.status).unwrap());
    for (name, value) in mock_resp.headers {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(mock_resp.body)).unwrap()
}
