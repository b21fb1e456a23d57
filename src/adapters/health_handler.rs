use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::persistence::ConnectionPool;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    pub store: String,
    pub health_monitor: String,
}

pub struct HealthHandler {
    pool: ConnectionPool,
    monitor_enabled: bool,
    start_time: std::time::Instant,
}

impl HealthHandler {
    pub fn new(pool: ConnectionPool, monitor_enabled: bool) -> Self {
        Self {
            pool,
            monitor_enabled,
            start_time: std::time::Instant::now(),
        }
    }

    /// Process health. Always 200 while the server answers.
    pub async fn health(&self) -> impl IntoResponse {
        let store = match self.pool.ping().await {
            Ok(()) => "ok",
            Err(_) => "unavailable",
        };
        let status = HealthStatus {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            checks: HealthChecks {
                store: store.to_string(),
                health_monitor: if self.monitor_enabled { "running" } else { "disabled" }
                    .to_string(),
            },
        };

        (StatusCode::OK, Json(status))
    }

    /// Ready once the connection store answers a ping
    pub async fn ready(&self) -> impl IntoResponse {
        match self.pool.ping().await {
            Ok(()) => (
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": "ready",
                    "message": "Server is ready to accept requests"
                })),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "Readiness check failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(serde_json::json!({
                        "status": "not_ready",
                        "message": "Connection store unavailable"
                    })),
                )
            }
        }
    }

    pub async fn live(&self) -> impl IntoResponse {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "alive",
                "message": "Server is alive"
            })),
        )
    }
}
