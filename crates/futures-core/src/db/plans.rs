//! Database operations for manual plans, including the atomic claim that
//! serializes the plan-tick and precision-thread workers (§4.C).

use crate::types::manual_plan::{ManualPlan, PlanStatus, Side};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct PlanRepository {
    pool: PgPool,
}

impl PlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, plan: &ManualPlan) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO manual_plans (
                id, symbol, side, listing_time, leverage, position_pct,
                stop_loss_pct, trailing_exit_pct, max_slippage_pct, notes,
                status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(plan.id)
        .bind(&plan.symbol)
        .bind(side_to_str(plan.side))
        .bind(plan.listing_time)
        .bind(plan.leverage as i32)
        .bind(plan.position_pct)
        .bind(plan.stop_loss_pct)
        .bind(plan.trailing_exit_pct)
        .bind(plan.max_slippage_pct)
        .bind(&plan.notes)
        .bind(status_to_str(plan.status))
        .bind(plan.created_at)
        .bind(plan.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ManualPlan>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Self::row_to_plan(&r)))
    }

    pub async fn list(&self, status: Option<PlanStatus>) -> Result<Vec<ManualPlan>> {
        let rows = match status {
            Some(s) => {
                sqlx::query(&format!(
                    "{SELECT_COLUMNS} WHERE status = $1 ORDER BY listing_time ASC"
                ))
                .bind(status_to_str(s))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY listing_time ASC"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.iter().map(Self::row_to_plan).collect())
    }

    pub async fn list_pending(&self) -> Result<Vec<ManualPlan>> {
        self.list(Some(PlanStatus::Pending)).await
    }

    /// `status = PENDING AND listing_time <= now`.
    pub async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ManualPlan>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status = 'pending' AND listing_time <= $1 ORDER BY listing_time ASC"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_plan).collect())
    }

    /// Plans within `threshold_secs` of firing but not yet due — used by the
    /// plan-tick to arm precision threads and warm up the price stream.
    pub async fn list_upcoming(&self, now: DateTime<Utc>, threshold_secs: i64) -> Result<Vec<ManualPlan>> {
        let horizon = now + chrono::Duration::seconds(threshold_secs);
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status = 'pending' AND listing_time > $1 AND listing_time <= $2 ORDER BY listing_time ASC"
        ))
        .bind(now)
        .bind(horizon)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_plan).collect())
    }

    /// Atomic compare-and-swap: `PENDING -> EXECUTING`. Returns whether the
    /// caller won the claim. This is the *only* serialization primitive
    /// between the plan-tick worker and a plan's precision thread.
    pub async fn try_claim(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE manual_plans
            SET status = 'executing', updated_at = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_executed(&self, id: Uuid) -> Result<()> {
        self.set_status(id, PlanStatus::Executed).await
    }

    pub async fn mark_failed(&self, id: Uuid) -> Result<()> {
        self.set_status(id, PlanStatus::Failed).await
    }

    /// Operator-initiated cancellation. Terminal only from PENDING.
    pub async fn cancel(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE manual_plans
            SET status = 'cancelled', updated_at = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_status(&self, id: Uuid, status: PlanStatus) -> Result<()> {
        sqlx::query("UPDATE manual_plans SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status_to_str(status))
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn row_to_plan(r: &sqlx::postgres::PgRow) -> ManualPlan {
        ManualPlan {
            id: r.get("id"),
            symbol: r.get("symbol"),
            side: str_to_side(r.get("side")),
            listing_time: r.get("listing_time"),
            leverage: r.get::<i32, _>("leverage") as u32,
            position_pct: r.get("position_pct"),
            stop_loss_pct: r.get("stop_loss_pct"),
            trailing_exit_pct: r.get("trailing_exit_pct"),
            max_slippage_pct: r.get("max_slippage_pct"),
            notes: r.get("notes"),
            status: str_to_status(r.get("status")),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, symbol, side, listing_time, leverage, position_pct,
        stop_loss_pct, trailing_exit_pct, max_slippage_pct, notes,
        status, created_at, updated_at
    FROM manual_plans
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

fn status_to_str(status: PlanStatus) -> &'static str {
    match status {
        PlanStatus::Pending => "pending",
        PlanStatus::Executing => "executing",
        PlanStatus::Executed => "executed",
        PlanStatus::Failed => "failed",
        PlanStatus::Cancelled => "cancelled",
    }
}

fn str_to_status(s: &str) -> PlanStatus {
    match s {
        "executing" => PlanStatus::Executing,
        "executed" => PlanStatus::Executed,
        "failed" => PlanStatus::Failed,
        "cancelled" => PlanStatus::Cancelled,
        _ => PlanStatus::Pending,
    }
}
