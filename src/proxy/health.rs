use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

/// `GET /health`
pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}
