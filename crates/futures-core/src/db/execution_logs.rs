//! Append-only audit trail for order placement and position closure.

use crate::types::execution_log::{ExecutionLog, LogEventType};
use crate::types::manual_plan::Side;
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct ExecutionLogRepository {
    pool: PgPool,
}

impl ExecutionLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, log: &ExecutionLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_logs (
                id, plan_id, position_id, event_type, symbol, side, price,
                quantity, order_id, status, payload, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(log.id)
        .bind(log.plan_id)
        .bind(log.position_id)
        .bind(event_type_to_str(log.event_type))
        .bind(&log.symbol)
        .bind(side_to_str(log.side))
        .bind(log.price)
        .bind(log.quantity)
        .bind(&log.order_id)
        .bind(&log.status)
        .bind(&log.payload)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent `order_filled` log for a position, if any — used by the
    /// close protocol to distinguish `external_closed` from `not_executed`.
    pub async fn latest_order_filled_for_position(
        &self,
        position_id: Uuid,
    ) -> Result<Option<ExecutionLog>> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE position_id = $1 AND event_type = 'order_filled' ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(position_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_log(&r)))
    }

    /// A `position_closed` log within the last `within` window — the close
    /// protocol adopts this log's reason when the position is found already
    /// gone on the exchange (§4.F).
    pub async fn recent_position_closed(
        &self,
        position_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<ExecutionLog>> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE position_id = $1 AND event_type = 'position_closed' AND created_at >= $2 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(position_id)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_log(&r)))
    }

    pub async fn list(
        &self,
        position_id: Option<Uuid>,
        plan_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ExecutionLog>> {
        let rows = match (position_id, plan_id) {
            (Some(pid), _) => {
                sqlx::query(&format!(
                    "{SELECT_COLUMNS} WHERE position_id = $1 ORDER BY created_at DESC LIMIT $2"
                ))
                .bind(pid)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (None, Some(plid)) => {
                sqlx::query(&format!(
                    "{SELECT_COLUMNS} WHERE plan_id = $1 ORDER BY created_at DESC LIMIT $2"
                ))
                .bind(plid)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (None, None) => {
                sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY created_at DESC LIMIT $1"))
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.iter().map(Self::row_to_log).collect())
    }

    fn row_to_log(r: &sqlx::postgres::PgRow) -> ExecutionLog {
        ExecutionLog {
            id: r.get("id"),
            plan_id: r.get("plan_id"),
            position_id: r.get("position_id"),
            event_type: str_to_event_type(r.get("event_type")),
            symbol: r.get("symbol"),
            side: str_to_side(r.get("side")),
            price: r.get("price"),
            quantity: r.get("quantity"),
            order_id: r.get("order_id"),
            status: r.get("status"),
            payload: r.get("payload"),
            created_at: r.get("created_at"),
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, plan_id, position_id, event_type, symbol, side, price,
        quantity, order_id, status, payload, created_at
    FROM execution_logs
"#;

fn event_type_to_str(t: LogEventType) -> &'static str {
    match t {
        LogEventType::OrderPlaced => "order_placed",
        LogEventType::OrderFilled => "order_filled",
        LogEventType::PositionClosed => "position_closed",
    }
}

fn str_to_event_type(s: &str) -> LogEventType {
    match s {
        "order_placed" => LogEventType::OrderPlaced,
        "position_closed" => LogEventType::PositionClosed,
        _ => LogEventType::OrderFilled,
    }
}

fn side_to_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "buy",
        Side::Sell => "sell",
    }
}

fn str_to_side(s: &str) -> Side {
    match s {
        "sell" => Side::Sell,
        _ => Side::Buy,
    }
}
