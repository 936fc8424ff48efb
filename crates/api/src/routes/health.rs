//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use order_store::OrderStore;
use serde::Serialize;

use super::orders::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub broker: BrokerHealth,
}

#[derive(Serialize)]
pub struct BrokerHealth {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub healthy: bool,
}

/// `GET /health`: reports service and broker health.
///
/// Responds 503 while the broker connection is down.
pub async fn check<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> (StatusCode, Json<HealthResponse>) {
    let healthy = state.broker.is_healthy().await;
    let (code, status) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status,
            broker: BrokerHealth {
                kind: state.broker.broker_type().as_str(),
                healthy,
            },
        }),
    )
}
