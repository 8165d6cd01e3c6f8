//! Operator-authored manual trading plans.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Lifecycle state of a `ManualPlan`.
///
/// `Pending -> Executing -> Executed|Failed`, with an operator-only escape to
/// `Cancelled` while still `Pending`. The `Pending -> Executing` edge is the
/// only transition requiring cross-worker mutual exclusion (see
/// `PlanRepository::try_claim`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Executing,
    Executed,
    Failed,
    Cancelled,
}

/// An operator's instruction to open a position at a precise future instant.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ManualPlan {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub listing_time: DateTime<Utc>,
    pub leverage: u32,
    pub position_pct: Decimal,
    pub stop_loss_pct: Decimal,
    pub trailing_exit_pct: Decimal,
    pub max_slippage_pct: Decimal,
    pub notes: Option<String>,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManualPlan {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: String,
        side: Side,
        listing_time: DateTime<Utc>,
        leverage: u32,
        position_pct: Decimal,
        stop_loss_pct: Decimal,
        trailing_exit_pct: Decimal,
        max_slippage_pct: Decimal,
        notes: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            symbol: normalize_symbol(&symbol),
            side,
            listing_time,
            leverage,
            position_pct,
            stop_loss_pct,
            trailing_exit_pct,
            max_slippage_pct,
            notes,
            status: PlanStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == PlanStatus::Pending && self.listing_time <= now
    }

    pub fn within_precision_horizon(&self, now: DateTime<Utc>, threshold_secs: i64) -> bool {
        self.status == PlanStatus::Pending
            && (self.listing_time - now).num_seconds() <= threshold_secs
    }
}

/// Append the venue's quote-asset suffix if the operator omitted it.
pub fn normalize_symbol(symbol: &str) -> String {
    let upper = symbol.to_uppercase();
    if upper.ends_with("USDT") || upper.ends_with("BUSD") || upper.ends_with("USDC") {
        upper
    } else {
        format!("{upper}USDT")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_symbol() {
        assert_eq!(normalize_symbol("btc"), "BTCUSDT");
        assert_eq!(normalize_symbol("ETHUSDT"), "ETHUSDT");
    }

    #[test]
    fn due_only_while_pending() {
        let mut plan = ManualPlan::new(
            "BTC".into(),
            Side::Buy,
            Utc::now() - chrono::Duration::seconds(1),
            5,
            Decimal::new(5, 1),
            Decimal::new(5, 2),
            Decimal::new(1, 1),
            Decimal::new(5, 3),
            None,
        );
        assert!(plan.is_due(Utc::now()));
        plan.status = PlanStatus::Executed;
        assert!(!plan.is_due(Utc::now()));
    }
}
