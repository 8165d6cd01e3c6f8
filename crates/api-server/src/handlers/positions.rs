//! Position read and exit-parameter handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use futures_core::types::position::{Position, PositionStatus};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListPositionsQuery {
    pub status: Option<PositionStatus>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// `Position` plus a dashboard-only projection of the current trailing-stop
/// trigger price, which isn't stored — it's derived from the live extrema.
#[derive(Debug, Serialize, ToSchema)]
pub struct PositionResponse {
    #[serde(flatten)]
    pub position: Position,
    pub trailing_stop_trigger: Option<Decimal>,
}

impl From<Position> for PositionResponse {
    fn from(position: Position) -> Self {
        let trailing_stop_trigger = position.trailing_trigger_price();
        Self {
            position,
            trailing_stop_trigger,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateExitParamsRequest {
    #[serde(default)]
    pub stop_loss_pct: Option<Decimal>,
    #[serde(default)]
    pub trailing_exit_pct: Option<Decimal>,
}

/// List positions, defaulting to `ACTIVE` when no status filter is given —
/// the dashboard's primary view is "what's open right now".
#[utoipa::path(
    get,
    path = "/positions",
    tag = "positions",
    params(ListPositionsQuery),
    responses((status = 200, description = "Positions", body = [PositionResponse]))
)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListPositionsQuery>,
) -> ApiResult<Json<Vec<PositionResponse>>> {
    let status = Some(query.status.unwrap_or(PositionStatus::Active));
    let limit = query.limit.unwrap_or(200).clamp(1, 1000);
    let positions = state.positions.list(status, limit).await?;
    Ok(Json(positions.into_iter().map(PositionResponse::from).collect()))
}

/// Fetch a single position, with its current trailing-stop trigger price.
#[utoipa::path(
    get,
    path = "/positions/{id}",
    tag = "positions",
    params(("id" = Uuid, Path, description = "Position id")),
    responses(
        (status = 200, description = "Position", body = PositionResponse),
        (status = 404, description = "Position not found")
    )
)]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PositionResponse>> {
    let position = state
        .positions
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("position {id}")))?;
    Ok(Json(position.into()))
}

/// Update a live position's exit parameters.
///
/// Only legal against an `ACTIVE` position. If the local row has drifted to
/// a non-active status, we check the exchange before refusing: if the venue
/// still reports the position open, the local row is stale and we restore
/// it to `ACTIVE` and apply the update; if the venue confirms it's gone, we
/// reject. If the venue is unreachable we cannot tell the difference, so we
/// optimistically restore to `ACTIVE` and accept the update without
/// touching `highest_price`/`lowest_price` — a documented risk, not a bug
/// (see DESIGN.md).
#[utoipa::path(
    put,
    path = "/positions/{id}/exit-params",
    tag = "positions",
    params(("id" = Uuid, Path, description = "Position id")),
    request_body = UpdateExitParamsRequest,
    responses(
        (status = 200, description = "Updated position", body = PositionResponse),
        (status = 400, description = "Position is no longer open on the exchange"),
        (status = 404, description = "Position not found")
    )
)]
pub async fn update_exit_params(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateExitParamsRequest>,
) -> ApiResult<Json<PositionResponse>> {
    let mut position = state
        .positions
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("position {id}")))?;

    if !position.is_active() {
        match state.gateway.get_open_positions().await {
            Some(open) => {
                let still_open = open.iter().any(|p| p.symbol == position.symbol);
                if !still_open {
                    return Err(ApiError::BadRequest(format!(
                        "position {id} is {:?} and no longer open on the exchange",
                        position.status
                    )));
                }
                position.status = PositionStatus::Active;
            }
            None => {
                // Exchange unreachable: restore optimistically, extrema untouched.
                position.status = PositionStatus::Active;
            }
        }
    }

    if let Some(stop_loss_pct) = req.stop_loss_pct {
        position.stop_loss_pct = stop_loss_pct;
    }
    if let Some(trailing_exit_pct) = req.trailing_exit_pct {
        position.trailing_exit_pct = trailing_exit_pct;
    }

    state.positions.update(&position).await?;
    Ok(Json(position.into()))
}
