//! Manual plan CRUD and lifecycle handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use chrono::{DateTime, Utc};
use futures_core::types::manual_plan::{ManualPlan, PlanStatus, Side};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateManualPlanRequest {
    pub symbol: String,
    pub side: Side,
    pub listing_time: DateTime<Utc>,
    pub leverage: u32,
    pub position_pct: Decimal,
    #[serde(default)]
    pub stop_loss_pct: Option<Decimal>,
    #[serde(default)]
    pub trailing_exit_pct: Option<Decimal>,
    #[serde(default)]
    pub max_slippage_pct: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListManualPlansQuery {
    pub status: Option<PlanStatus>,
}

/// Create a manual plan, due to fire at `listing_time`.
#[utoipa::path(
    post,
    path = "/manual-plans",
    tag = "manual-plans",
    request_body = CreateManualPlanRequest,
    responses(
        (status = 201, description = "Plan created", body = ManualPlan),
        (status = 422, description = "Invalid plan parameters")
    )
)]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateManualPlanRequest>,
) -> ApiResult<Json<ManualPlan>> {
    if req.position_pct <= Decimal::ZERO || req.position_pct > Decimal::ONE {
        return Err(ApiError::Validation(
            "position_pct must be in (0, 1]".to_string(),
        ));
    }
    if req.leverage == 0 || req.leverage > state.config.trading.max_leverage {
        return Err(ApiError::Validation(format!(
            "leverage must be between 1 and {}",
            state.config.trading.max_leverage
        )));
    }

    let plan = ManualPlan::new(
        req.symbol,
        req.side,
        req.listing_time,
        req.leverage,
        req.position_pct,
        req.stop_loss_pct
            .unwrap_or(state.config.trading.default_stop_loss_pct),
        req.trailing_exit_pct
            .unwrap_or(state.config.trading.default_trailing_exit_pct),
        req.max_slippage_pct
            .unwrap_or(state.config.trading.max_slippage_pct),
        req.notes,
    );

    state.plans.create(&plan).await?;
    Ok(Json(plan))
}

/// Cancel a plan. Only legal while the plan is still `PENDING`.
#[utoipa::path(
    post,
    path = "/manual-plans/{id}/cancel",
    tag = "manual-plans",
    params(("id" = Uuid, Path, description = "Plan id")),
    responses(
        (status = 200, description = "Plan cancelled", body = ManualPlan),
        (status = 404, description = "Plan not found"),
        (status = 409, description = "Plan is no longer pending")
    )
)]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ManualPlan>> {
    let plan = state
        .plans
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("manual plan {id}")))?;

    if plan.status != PlanStatus::Pending {
        return Err(ApiError::Conflict(format!(
            "plan {id} is {:?}, not pending",
            plan.status
        )));
    }

    if !state.plans.cancel(id).await? {
        return Err(ApiError::Conflict(format!(
            "plan {id} was claimed for execution before the cancel landed"
        )));
    }

    let plan = state
        .plans
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("manual plan {id}")))?;
    Ok(Json(plan))
}

/// List manual plans, optionally filtered by status.
#[utoipa::path(
    get,
    path = "/manual-plans",
    tag = "manual-plans",
    params(ListManualPlansQuery),
    responses((status = 200, description = "Plans", body = [ManualPlan]))
)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListManualPlansQuery>,
) -> ApiResult<Json<Vec<ManualPlan>>> {
    Ok(Json(state.plans.list(query.status).await?))
}

/// Fetch a single manual plan.
#[utoipa::path(
    get,
    path = "/manual-plans/{id}",
    tag = "manual-plans",
    params(("id" = Uuid, Path, description = "Plan id")),
    responses(
        (status = 200, description = "Plan", body = ManualPlan),
        (status = 404, description = "Plan not found")
    )
)]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ManualPlan>> {
    let plan = state
        .plans
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("manual plan {id}")))?;
    Ok(Json(plan))
}
