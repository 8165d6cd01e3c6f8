//! Append-only audit trail for order placement and position closure.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::types::manual_plan::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogEventType {
    OrderPlaced,
    OrderFilled,
    PositionClosed,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub plan_id: Option<Uuid>,
    pub position_id: Option<Uuid>,
    pub event_type: LogEventType,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub order_id: Option<String>,
    pub status: String,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionLog {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plan_id: Option<Uuid>,
        position_id: Option<Uuid>,
        event_type: LogEventType,
        symbol: String,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        order_id: Option<String>,
        status: String,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan_id,
            position_id,
            event_type,
            symbol,
            side,
            price,
            quantity,
            order_id,
            status,
            payload,
            created_at: Utc::now(),
        }
    }
}
