use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::time::Instant;

use crate::controller::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    store: ComponentHealth,
}

/// Health status of a component
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    backend: &'static str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// GET /healthz - Liveness plus store reachability
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.balancer.store();
    let start = Instant::now();

    let component = match store.ping().await {
        Ok(()) => ComponentHealth {
            backend: store.backend(),
            status: "healthy",
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, backend = store.backend(), "store health check failed");
            ComponentHealth {
                backend: store.backend(),
                status: "unhealthy",
                latency_ms: None,
                error: Some(e.to_string()),
            }
        }
    };

    let (code, status) = if component.error.is_none() {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        code,
        Json(HealthResponse {
            status,
            timestamp: chrono::Utc::now(),
            store: component,
        }),
    )
}
