//! Health check handlers.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::error::ApiResult;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Current timestamp.
    pub timestamp: DateTime<Utc>,
    /// Database connection status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Exchange gateway's REST health snapshot (failure streak, last failure).
    pub gateway: GatewayHealthResponse,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GatewayHealthResponse {
    pub status: String,
    pub failure_streak: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_warning_at: Option<DateTime<Utc>>,
}

impl From<futures_core::api::gateway::GatewayHealth> for GatewayHealthResponse {
    fn from(h: futures_core::api::gateway::GatewayHealth) -> Self {
        Self {
            status: h.status.to_string(),
            failure_streak: h.failure_streak,
            last_failure_at: h.last_failure_at,
            last_warning_at: h.last_warning_at,
        }
    }
}

/// Health check endpoint. Process liveness plus the exchange gateway's REST
/// health snapshot — this never touches the database or the network, so it
/// stays cheap enough for a load balancer to poll.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        database: None,
        gateway: state.gateway.health().into(),
    })
}

/// Readiness check endpoint (includes database check).
#[utoipa::path(
    get,
    path = "/ready",
    tag = "health",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse),
        (status = 503, description = "Service is not ready")
    )
)]
pub async fn readiness(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthResponse>> {
    // Check database connection
    let db_status = match sqlx::query("SELECT 1").fetch_one(&state.pool).await {
        Ok(_) => "connected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    let status = if db_status == "connected" {
        "ready"
    } else {
        "degraded"
    };

    Ok(Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        database: Some(db_status),
        gateway: state.gateway.health().into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_core::api::gateway::GatewayHealth;

    #[test]
    fn gateway_health_response_carries_status() {
        let health = GatewayHealth {
            status: "degraded",
            failure_streak: 4,
            last_failure_at: Some(Utc::now()),
            last_warning_at: None,
        };
        let resp: GatewayHealthResponse = health.into();
        assert_eq!(resp.status, "degraded");
        assert_eq!(resp.failure_streak, 4);
    }
}
