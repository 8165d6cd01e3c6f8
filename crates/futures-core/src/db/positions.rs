//! Database operations for positions.

use crate::types::manual_plan::Side;
use crate::types::position::{ExitReason, Position, PositionStats, PositionStatus};
use crate::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Repository for position data. Owns the `(symbol, side)` ACTIVE-uniqueness
/// invariant only insofar as it exposes the query the reconciler needs to
/// detect violations (`get_active_by_symbol_side`) — enforcement itself is
/// the reconciler's job (see `risk-manager::reconciler`).
#[derive(Clone)]
pub struct PositionRepository {
    pool: PgPool,
}

impl PositionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, plan_id, symbol, side, status, is_external, order_id,
                entry_price, entry_quantity, entry_time,
                exit_price, exit_quantity, exit_time, exit_reason,
                leverage, stop_loss_pct, trailing_exit_pct, max_slippage_pct,
                highest_price, lowest_price, last_check_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(position.id)
        .bind(position.plan_id)
        .bind(&position.symbol)
        .bind(side_to_str(position.side))
        .bind(status_to_str(position.status))
        .bind(position.is_external)
        .bind(&position.order_id)
        .bind(position.entry_price)
        .bind(position.entry_quantity)
        .bind(position.entry_time)
        .bind(position.exit_price)
        .bind(position.exit_quantity)
        .bind(position.exit_time)
        .bind(position.exit_reason.map(reason_to_str))
        .bind(position.leverage as i32)
        .bind(position.stop_loss_pct)
        .bind(position.trailing_exit_pct)
        .bind(position.max_slippage_pct)
        .bind(position.highest_price)
        .bind(position.lowest_price)
        .bind(position.last_check_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Full-row update. Used by the monitor's per-exit close path and the
    /// reconciler's restore-on-sync path, both of which mutate most fields
    /// at once.
    pub async fn update(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE positions SET
                status = $2,
                order_id = $3,
                entry_price = $4,
                entry_quantity = $5,
                exit_price = $6,
                exit_quantity = $7,
                exit_time = $8,
                exit_reason = $9,
                leverage = $10,
                stop_loss_pct = $11,
                trailing_exit_pct = $12,
                max_slippage_pct = $13,
                highest_price = $14,
                lowest_price = $15,
                last_check_time = $16
            WHERE id = $1
            "#,
        )
        .bind(position.id)
        .bind(status_to_str(position.status))
        .bind(&position.order_id)
        .bind(position.entry_price)
        .bind(position.entry_quantity)
        .bind(position.exit_price)
        .bind(position.exit_quantity)
        .bind(position.exit_time)
        .bind(position.exit_reason.map(reason_to_str))
        .bind(position.leverage as i32)
        .bind(position.stop_loss_pct)
        .bind(position.trailing_exit_pct)
        .bind(position.max_slippage_pct)
        .bind(position.highest_price)
        .bind(position.lowest_price)
        .bind(position.last_check_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Bulk-update just the two running extrema plus the tick timestamp, for
    /// positions that did not trigger an exit this tick.
    pub async fn update_extrema(
        &self,
        id: Uuid,
        highest_price: Option<Decimal>,
        lowest_price: Option<Decimal>,
        last_check_time: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE positions SET
                highest_price = $2,
                lowest_price = $3,
                last_check_time = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(highest_price)
        .bind(lowest_price)
        .bind(last_check_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Position>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Self::row_to_position(&r)))
    }

    pub async fn get_active(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status = 'active' ORDER BY entry_time ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_position).collect())
    }

    /// All ACTIVE positions for a `(symbol, side)` pair — used by the
    /// reconciler to detect and collapse duplicates (invariant 1 in §3).
    pub async fn get_active_by_symbol_side(
        &self,
        symbol: &str,
        side: Side,
    ) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status = 'active' AND symbol = $1 AND side = $2 ORDER BY entry_time DESC"
        ))
        .bind(symbol)
        .bind(side_to_str(side))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_position).collect())
    }

    pub async fn list(
        &self,
        status: Option<PositionStatus>,
        limit: i64,
    ) -> Result<Vec<Position>> {
        let rows = match status {
            Some(s) => {
                sqlx::query(&format!(
                    "{SELECT_COLUMNS} WHERE status = $1 ORDER BY entry_time DESC LIMIT $2"
                ))
                .bind(status_to_str(s))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "{SELECT_COLUMNS} ORDER BY entry_time DESC LIMIT $1"
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(Self::row_to_position).collect())
    }

    /// `(active, total)` child count for a plan — used by the reconciler to
    /// decide when a `ManualPlan` has no remaining exposure left to govern
    /// (invariant 3 in §3).
    pub async fn count_children(&self, plan_id: Uuid) -> Result<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'active') as active,
                COUNT(*) as total
            FROM positions WHERE plan_id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((
            row.get::<Option<i64>, _>("active").unwrap_or(0),
            row.get::<Option<i64>, _>("total").unwrap_or(0),
        ))
    }

    pub async fn get_stats(&self) -> Result<PositionStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                COUNT(*) FILTER (WHERE status = 'active') as active,
                COUNT(*) FILTER (WHERE status = 'closed') as closed,
                COALESCE(SUM((exit_price - entry_price) * entry_quantity) FILTER (
                    WHERE status = 'closed' AND side = 'buy'
                ), 0)
                + COALESCE(SUM((entry_price - exit_price) * entry_quantity) FILTER (
                    WHERE status = 'closed' AND side = 'sell'
                ), 0) as realized,
                COUNT(*) FILTER (
                    WHERE status = 'closed' AND side = 'buy' AND exit_price > entry_price
                ) + COUNT(*) FILTER (
                    WHERE status = 'closed' AND side = 'sell' AND exit_price < entry_price
                ) as wins,
                COUNT(*) FILTER (
                    WHERE status = 'closed' AND side = 'buy' AND exit_price <= entry_price
                ) + COUNT(*) FILTER (
                    WHERE status = 'closed' AND side = 'sell' AND exit_price >= entry_price
                ) as losses
            FROM positions
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(PositionStats {
            total_positions: row.get::<Option<i64>, _>("total").unwrap_or(0) as u64,
            active_positions: row.get::<Option<i64>, _>("active").unwrap_or(0) as u64,
            closed_positions: row.get::<Option<i64>, _>("closed").unwrap_or(0) as u64,
            total_realized_pnl: row.get::<Option<Decimal>, _>("realized").unwrap_or_default(),
            win_count: row.get::<Option<i64>, _>("wins").unwrap_or(0) as u64,
            loss_count: row.get::<Option<i64>, _>("losses").unwrap_or(0) as u64,
        })
    }

    fn row_to_position(r: &sqlx::postgres::PgRow) -> Position {
        Position {
            id: r.get("id"),
            plan_id: r.get("plan_id"),
            symbol: r.get("symbol"),
            side: str_to_side(r.get("side")),
            status: str_to_status(r.get("status")),
            is_external: r.get("is_external"),
            order_id: r.get("order_id"),
            entry_price: r.get("entry_price"),
            entry_quantity: r.get("entry_quantity"),
            entry_time: r.get("entry_time"),
            exit_price: r.get("exit_price"),
            exit_quantity: r.get("exit_quantity"),
            exit_time: r.get("exit_time"),
            exit_reason: r
                .get::<Option<String>, _>("exit_reason")
                .map(|s| str_to_reason(&s)),
            leverage: r.get::<i32, _>("leverage") as u32,
            stop_loss_pct: r.get("stop_loss_pct"),
            trailing_exit_pct: r.get("trailing_exit_pct"),
            max_slippage_pct: r.get("max_slippage_pct"),
            highest_price: r.get("highest_price"),
            lowest_price: r.get("lowest_price"),
            last_check_time: r.get("last_check_time"),
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, plan_id, symbol, side, status, is_external, order_id,
        entry_price, entry_quantity, entry_time,
        exit_price, exit_quantity, exit_time, exit_reason,
        leverage, stop_loss_pct, trailing_exit_pct, max_slippage_pct,
        highest_price, lowest_price, last_check_time
    FROM positions
"#;

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

fn status_to_str(status: PositionStatus) -> &'static str {
    match status {
        PositionStatus::Active => "active",
        PositionStatus::Closed => "closed",
        PositionStatus::Liquidated => "liquidated",
    }
}

fn str_to_status(s: &str) -> PositionStatus {
    match s {
        "closed" => PositionStatus::Closed,
        "liquidated" => PositionStatus::Liquidated,
        _ => PositionStatus::Active,
    }
}

fn reason_to_str(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::StopLoss => "stop_loss",
        ExitReason::TrailingStop => "trailing_stop",
        ExitReason::ExternalClosed => "external_closed",
        ExitReason::DuplicateMerged => "duplicate_merged",
        ExitReason::NotExecuted => "not_executed",
        ExitReason::Manual => "manual",
    }
}

fn str_to_reason(s: &str) -> ExitReason {
    match s {
        "trailing_stop" => ExitReason::TrailingStop,
        "external_closed" => ExitReason::ExternalClosed,
        "duplicate_merged" => ExitReason::DuplicateMerged,
        "not_executed" => ExitReason::NotExecuted,
        "manual" => ExitReason::Manual,
        _ => ExitReason::StopLoss,
    }
}
