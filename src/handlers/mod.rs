// =============================================================================
// HANDLERS MODULE
// =============================================================================
// HTTP request handlers (controller layer). Handlers extract, call a service
// and wrap the result; business rules live in the services.
//
// AXUM EXTRACTORS USED:
// - State<Arc<AppState>>: injected services
// - CurrentUser: identity forwarded by the gateway (401 when missing)
// - Path / Query: request data
// - ApiJson: JSON bodies; decode failures become INVALID_INPUT
// =============================================================================

pub mod cart;
pub mod flash_sales;
pub mod orders;
pub mod products;

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::app::AppState;
use crate::models::{HealthResponse, ReadinessChecks, ReadinessResponse};

// =============================================================================
// HEALTH CHECK ENDPOINTS
// =============================================================================

/// Liveness probe.
///
/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "order-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness probe: the store must answer, and Redis too when configured.
///
/// GET /ready
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let store_healthy = state.store.health_check().await;
    let redis_healthy = state.cache.ping().await;

    let all_healthy = store_healthy && redis_healthy.unwrap_or(true);
    let status = if all_healthy { "ready" } else { "not_ready" };
    let code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(ReadinessResponse {
            status: status.to_string(),
            checks: ReadinessChecks {
                store: store_healthy,
                redis: redis_healthy,
            },
        }),
    )
}

// =============================================================================
// METRICS ENDPOINT
// =============================================================================
/// Prometheus metrics in text exposition format.
///
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> (StatusCode, String) {
    match &state.metrics_handle {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed\n".to_string(),
        ),
    }
}
