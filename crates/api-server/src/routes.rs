//! API route definitions.

use axum::middleware as axum_middleware;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers::{execution_logs, health, manual_plans, positions};
use crate::middleware::require_api_key;
use crate::state::AppState;

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Futures Listing Engine API",
        version = "1.0.0",
        description = "Operator-facing REST API for the futures listing engine"
    ),
    paths(
        health::health_check,
        health::readiness,
        manual_plans::create,
        manual_plans::cancel,
        manual_plans::list,
        manual_plans::get,
        positions::list,
        positions::get,
        positions::update_exit_params,
        execution_logs::list,
    ),
    components(
        schemas(
            crate::error::ErrorResponse,
            health::HealthResponse,
            health::GatewayHealthResponse,
            manual_plans::CreateManualPlanRequest,
            futures_core::types::manual_plan::ManualPlan,
            futures_core::types::manual_plan::PlanStatus,
            futures_core::types::manual_plan::Side,
            positions::PositionResponse,
            positions::UpdateExitParamsRequest,
            futures_core::types::position::Position,
            futures_core::types::position::PositionStatus,
            futures_core::types::position::ExitReason,
            futures_core::types::execution_log::ExecutionLog,
            futures_core::types::execution_log::LogEventType,
        )
    ),
    tags(
        (name = "health", description = "Process liveness and exchange gateway health"),
        (name = "manual-plans", description = "Operator-authored entry plans"),
        (name = "positions", description = "Live and historical futures exposure"),
        (name = "execution-logs", description = "Append-only order/fill/close audit trail"),
    )
)]
pub struct ApiDoc;

/// Create the main router with all routes. The engine has a single
/// operator, so every non-public route shares one auth tier: a valid API
/// key, nothing more.
pub fn create_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness));

    let operator_routes = Router::new()
        .route(
            "/manual-plans",
            get(manual_plans::list).post(manual_plans::create),
        )
        .route("/manual-plans/{id}", get(manual_plans::get))
        .route("/manual-plans/{id}/cancel", post(manual_plans::cancel))
        .route("/positions", get(positions::list))
        .route("/positions/{id}", get(positions::get))
        .route(
            "/positions/{id}/exit-params",
            put(positions::update_exit_params),
        )
        .route("/execution-logs", get(execution_logs::list))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .merge(public_routes)
        .merge(operator_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec() {
        let doc = ApiDoc::openapi();
        let json = doc.to_json().unwrap();
        assert!(json.contains("Futures Listing Engine API"));
        assert!(json.contains("manual-plans"));
        assert!(json.contains("positions"));
        assert!(json.contains("execution-logs"));
    }
}
