//! Read-only access to the append-only execution audit trail.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;
use uuid::Uuid;

use futures_core::types::execution_log::ExecutionLog;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListExecutionLogsQuery {
    pub position_id: Option<Uuid>,
    pub plan_id: Option<Uuid>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// List execution log entries, optionally filtered to a single position or
/// plan. `position_id` takes precedence over `plan_id` when both are given.
#[utoipa::path(
    get,
    path = "/execution-logs",
    tag = "execution-logs",
    params(ListExecutionLogsQuery),
    responses((status = 200, description = "Execution log entries", body = [ExecutionLog]))
)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListExecutionLogsQuery>,
) -> ApiResult<Json<Vec<ExecutionLog>>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let logs = state
        .logs
        .list(query.position_id, query.plan_id, limit)
        .await?;
    Ok(Json(logs))
}
