//! Live and historical futures exposure, with the monotonic trailing-extrema
//! invariant the monitor depends on.

use crate::types::manual_plan::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Active,
    Closed,
    Liquidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    ExternalClosed,
    DuplicateMerged,
    /// No `order_filled` log exists for this position — it was never actually
    /// opened on the exchange, even though a row exists locally.
    NotExecuted,
    Manual,
}

/// A live or historical exposure opened by a `ManualPlan` or discovered via
/// reconciliation (`is_external = true`).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Position {
    pub id: Uuid,
    pub plan_id: Option<Uuid>,
    pub symbol: String,
    pub side: Side,
    pub status: PositionStatus,
    pub is_external: bool,
    pub order_id: Option<String>,

    pub entry_price: Decimal,
    pub entry_quantity: Decimal,
    pub entry_time: DateTime<Utc>,

    pub exit_price: Option<Decimal>,
    pub exit_quantity: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,

    pub leverage: u32,
    pub stop_loss_pct: Decimal,
    pub trailing_exit_pct: Decimal,
    pub max_slippage_pct: Decimal,

    /// Running extrema. Invariant: once set, `highest_price` is
    /// non-decreasing and `lowest_price` non-increasing over the position's
    /// life (see `update_extrema`).
    pub highest_price: Option<Decimal>,
    pub lowest_price: Option<Decimal>,

    pub last_check_time: DateTime<Utc>,
}

#[allow(clippy::too_many_arguments)]
impl Position {
    pub fn new_entry(
        plan_id: Option<Uuid>,
        symbol: String,
        side: Side,
        order_id: Option<String>,
        entry_price: Decimal,
        entry_quantity: Decimal,
        leverage: u32,
        stop_loss_pct: Decimal,
        trailing_exit_pct: Decimal,
        max_slippage_pct: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            plan_id,
            symbol,
            side,
            status: PositionStatus::Active,
            is_external: false,
            order_id,
            entry_price,
            entry_quantity,
            entry_time: now,
            exit_price: None,
            exit_quantity: None,
            exit_time: None,
            exit_reason: None,
            leverage,
            stop_loss_pct,
            trailing_exit_pct,
            max_slippage_pct,
            highest_price: Some(entry_price),
            lowest_price: Some(entry_price),
            last_check_time: now,
        }
    }

    /// Create an externally-discovered position. Per the reconciler's
    /// contract, both extrema are seeded from the current mark price, not
    /// the entry price, so trailing starts tracking from the moment of
    /// discovery.
    pub fn new_external(
        symbol: String,
        side: Side,
        entry_price: Decimal,
        entry_quantity: Decimal,
        current_mark_price: Decimal,
        leverage: u32,
        stop_loss_pct: Decimal,
        trailing_exit_pct: Decimal,
        max_slippage_pct: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            plan_id: None,
            symbol,
            side,
            status: PositionStatus::Active,
            is_external: true,
            order_id: None,
            entry_price,
            entry_quantity,
            entry_time: now,
            exit_price: None,
            exit_quantity: None,
            exit_time: None,
            exit_reason: None,
            leverage,
            stop_loss_pct,
            trailing_exit_pct,
            max_slippage_pct,
            highest_price: Some(current_mark_price),
            lowest_price: Some(current_mark_price),
            last_check_time: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }

    /// Advance the running extrema monotonically. Callers implementing the
    /// trailing-stop check must capture `highest_price`/`lowest_price`
    /// *before* calling this, so the same tick never evaluates against an
    /// extremum it just updated (same-tick safety).
    pub fn update_extrema(&mut self, current: Decimal) {
        self.highest_price = Some(match self.highest_price {
            Some(h) => h.max(current),
            None => current,
        });
        self.lowest_price = Some(match self.lowest_price {
            Some(l) => l.min(current),
            None => current,
        });
        self.last_check_time = Utc::now();
    }

    /// Evaluate stop-loss and trailing-exit against extrema as they stood
    /// *before* this tick's update (`captured_high`/`captured_low`), per the
    /// captured-before-update rule.
    pub fn evaluate_exit(
        &self,
        current: Decimal,
        captured_high: Option<Decimal>,
        captured_low: Option<Decimal>,
    ) -> Option<ExitReason> {
        match self.side {
            Side::Buy => {
                let stop_trigger = self.entry_price * (Decimal::ONE - self.stop_loss_pct);
                if current <= stop_trigger {
                    return Some(ExitReason::StopLoss);
                }
                let high = captured_high.unwrap_or(self.entry_price);
                let trailing_trigger = high * (Decimal::ONE - self.trailing_exit_pct);
                if current <= trailing_trigger {
                    return Some(ExitReason::TrailingStop);
                }
            }
            Side::Sell => {
                let stop_trigger = self.entry_price * (Decimal::ONE + self.stop_loss_pct);
                if current >= stop_trigger {
                    return Some(ExitReason::StopLoss);
                }
                let low = captured_low.unwrap_or(self.entry_price);
                let trailing_trigger = low * (Decimal::ONE + self.trailing_exit_pct);
                if current >= trailing_trigger {
                    return Some(ExitReason::TrailingStop);
                }
            }
        }
        None
    }

    /// Current trailing-stop trigger price, for dashboard projection.
    pub fn trailing_trigger_price(&self) -> Option<Decimal> {
        match self.side {
            Side::Buy => self
                .highest_price
                .map(|h| h * (Decimal::ONE - self.trailing_exit_pct)),
            Side::Sell => self
                .lowest_price
                .map(|l| l * (Decimal::ONE + self.trailing_exit_pct)),
        }
    }

    pub fn close(&mut self, exit_price: Decimal, exit_quantity: Decimal, reason: ExitReason) {
        self.exit_price = Some(exit_price);
        self.exit_quantity = Some(exit_quantity);
        self.exit_time = Some(Utc::now());
        self.exit_reason = Some(reason);
        self.status = PositionStatus::Closed;
    }

    pub fn realized_pnl(&self) -> Option<Decimal> {
        let exit_price = self.exit_price?;
        let qty = self.exit_quantity.unwrap_or(self.entry_quantity);
        let diff = match self.side {
            Side::Buy => exit_price - self.entry_price,
            Side::Sell => self.entry_price - exit_price,
        };
        Some(diff * qty)
    }

    pub fn age_secs(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.last_check_time)
            .num_seconds()
            .max(0)
    }
}

/// Summary statistics for the dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PositionStats {
    pub total_positions: u64,
    pub active_positions: u64,
    pub closed_positions: u64,
    pub total_realized_pnl: Decimal,
    pub win_count: u64,
    pub loss_count: u64,
}

impl PositionStats {
    pub fn win_rate(&self) -> Option<f64> {
        let total = self.win_count + self.loss_count;
        if total == 0 {
            None
        } else {
            Some(self.win_count as f64 / total as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buy_position(entry: Decimal, stop_loss_pct: Decimal, trailing_pct: Decimal) -> Position {
        Position::new_entry(
            None,
            "BTCUSDT".into(),
            Side::Buy,
            Some("1".into()),
            entry,
            Decimal::new(25, 0),
            5,
            stop_loss_pct,
            trailing_pct,
            Decimal::new(5, 3),
        )
    }

    #[test]
    fn extrema_seed_to_entry_price() {
        let pos = buy_position(Decimal::new(100, 0), Decimal::new(5, 2), Decimal::new(1, 1));
        assert_eq!(pos.highest_price, Some(Decimal::new(100, 0)));
        assert_eq!(pos.lowest_price, Some(Decimal::new(100, 0)));
    }

    #[test]
    fn trailing_stop_buy_s1() {
        // S1: entry 100, trailing 10%. Price rises to 120, then falls to 107 (<=108).
        let mut pos = buy_position(Decimal::new(100, 0), Decimal::new(5, 2), Decimal::new(1, 1));
        pos.update_extrema(Decimal::new(120, 0));
        assert_eq!(pos.highest_price, Some(Decimal::new(120, 0)));

        let captured_high = pos.highest_price;
        let captured_low = pos.lowest_price;
        let reason = pos.evaluate_exit(Decimal::new(107, 0), captured_high, captured_low);
        assert_eq!(reason, Some(ExitReason::TrailingStop));
    }

    #[test]
    fn stop_loss_sell_s2() {
        // S2: entry 200, side SELL, stop_loss_pct 5% -> trigger at 210.
        let pos = Position::new_entry(
            None,
            "ETHUSDT".into(),
            Side::Sell,
            Some("1".into()),
            Decimal::new(200, 0),
            Decimal::new(25, 0),
            5,
            Decimal::new(5, 2),
            Decimal::new(1, 1),
            Decimal::new(5, 3),
        );
        assert_eq!(pos.evaluate_exit(Decimal::new(2021, 1), pos.highest_price, pos.lowest_price), None);
        assert_eq!(
            pos.evaluate_exit(Decimal::new(2101, 1), pos.highest_price, pos.lowest_price),
            Some(ExitReason::StopLoss)
        );
    }

    #[test]
    fn same_tick_safety() {
        // The trailing check must use the extremum as captured before update,
        // not after — captured_high stays at 100 even though update_extrema
        // below would bump highest_price to 130.
        let mut pos = buy_position(Decimal::new(100, 0), Decimal::new(5, 2), Decimal::new(5, 2));
        let captured_high = pos.highest_price;
        let captured_low = pos.lowest_price;
        pos.update_extrema(Decimal::new(130, 0));
        // Using the captured (pre-update) value: trigger = 100*0.95=95, current 130 no trigger.
        assert_eq!(pos.evaluate_exit(Decimal::new(130, 0), captured_high, captured_low), None);
    }

    #[test]
    fn extrema_monotonic() {
        let mut pos = buy_position(Decimal::new(100, 0), Decimal::new(5, 2), Decimal::new(1, 1));
        pos.update_extrema(Decimal::new(90, 0));
        assert_eq!(pos.highest_price, Some(Decimal::new(100, 0)));
        assert_eq!(pos.lowest_price, Some(Decimal::new(90, 0)));
        pos.update_extrema(Decimal::new(150, 0));
        assert_eq!(pos.highest_price, Some(Decimal::new(150, 0)));
        assert_eq!(pos.lowest_price, Some(Decimal::new(90, 0)));
    }
}
