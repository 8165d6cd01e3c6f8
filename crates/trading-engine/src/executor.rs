//! Execution Engine — turns a claimed `ManualPlan` into a live `Position`
//! (component D, §4.D), and submits the closing order for the Position
//! Monitor's close protocol (§4.F step 4).

use futures_core::api::gateway::Gateway;
use futures_core::config::TradingConfig;
use futures_core::db::execution_logs::ExecutionLogRepository;
use futures_core::db::plans::PlanRepository;
use futures_core::db::positions::PositionRepository;
use futures_core::types::execution_log::{ExecutionLog, LogEventType};
use futures_core::types::manual_plan::{ManualPlan, Side};
use futures_core::types::order::{floor_to_quantum, OrderResult, OrderStatus, PositionMode, PositionSide};
use futures_core::types::position::Position;
use futures_core::{Error, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Minimal pre-trade gate: symbol denylist + leverage ceiling. Grounded in
/// `execution_service.py`'s call to `RiskManagementService.check_trading_allowed`,
/// scaled down to what's in scope here — the originating system's daily-loss
/// and drawdown circuit breaker is strategy-research territory, not this
/// engine's job.
pub struct RiskGate {
    denylist: Vec<String>,
    max_leverage: u32,
}

impl RiskGate {
    pub fn new(denylist: Vec<String>, max_leverage: u32) -> Self {
        Self { denylist, max_leverage }
    }

    pub fn check_trading_allowed(&self, symbol: &str, leverage: u32) -> Result<()> {
        if self.denylist.iter().any(|s| s == symbol) {
            return Err(Error::DataInvariant(format!("{symbol} is denylisted for trading")));
        }
        if leverage > self.max_leverage {
            return Err(Error::DataInvariant(format!(
                "leverage {leverage} exceeds ceiling {}",
                self.max_leverage
            )));
        }
        Ok(())
    }
}

/// Outcome of an entry attempt, discriminated rather than thrown (§9).
#[derive(Debug)]
pub enum EntryOutcome {
    Filled(Position),
    InsufficientMargin,
    OrderNotFilled(String),
}

pub struct ExecutionEngine {
    gateway: Arc<Gateway>,
    config: TradingConfig,
    plans: PlanRepository,
    positions: PositionRepository,
    logs: ExecutionLogRepository,
    risk_gate: RiskGate,
}

impl ExecutionEngine {
    pub fn new(
        gateway: Arc<Gateway>,
        config: TradingConfig,
        plans: PlanRepository,
        positions: PositionRepository,
        logs: ExecutionLogRepository,
        risk_gate: RiskGate,
    ) -> Self {
        Self {
            gateway,
            config,
            plans,
            positions,
            logs,
            risk_gate,
        }
    }

    /// Runs the full §4.D algorithm against an already-`EXECUTING` plan.
    /// Entry failures never create a Position; the plan is left for the
    /// caller to mark FAILED. Any exchange-side fill that still occurred
    /// will surface through reconciliation as `is_external=true` (§4.D).
    pub async fn execute_plan(&self, plan: &ManualPlan) -> Result<EntryOutcome> {
        let symbol = plan.symbol.clone();

        self.risk_gate.check_trading_allowed(&symbol, plan.leverage)?;

        // Step 2: leverage + balance.
        self.gateway.set_leverage(&symbol, plan.leverage).await?;
        self.gateway.clear_balance_cache(None);
        let available_balance = self.gateway.get_futures_available_balance("USDT").await?;

        // Step 3: mark price (no safe fallback — abort sizing if unavailable).
        let mark_price = self.gateway.get_mark_price(&symbol).await?;
        if mark_price <= Decimal::ZERO {
            return Err(Error::DataInvariant(format!("non-positive mark price for {symbol}")));
        }

        // Step 4: allocation, clamped to configured cap.
        let mut allocation = available_balance * plan.position_pct;
        if let Some(cap) = self.config.max_order_amount {
            if allocation > cap {
                allocation = cap;
            }
        }

        // Step 5: size to stepSize.
        let filters = self.gateway.get_symbol_filters(&symbol).await?;
        let qty = floor_to_quantum(
            (allocation * Decimal::from(plan.leverage)) / mark_price,
            filters.step_size,
        );
        if qty <= Decimal::ZERO {
            return Err(Error::DataInvariant("sized quantity is non-positive".to_string()));
        }

        // Step 6: margin guard.
        let required_margin = (qty * mark_price) / Decimal::from(plan.leverage);
        if required_margin > Decimal::new(99, 2) * available_balance {
            return Ok(EntryOutcome::InsufficientMargin);
        }

        // Subscribe the price stream best-effort (non-blocking failure path —
        // a missing subscription never aborts sizing/entry).
        // Callers that wired a PriceStream do so via `Gateway::with_price_stream_cache`;
        // the engine itself has no direct WS dependency.

        let position_mode = self.gateway.get_position_mode().await?;
        let position_side = match (position_mode, plan.side) {
            (PositionMode::Hedge, Side::Buy) => Some(PositionSide::Long),
            (PositionMode::Hedge, Side::Sell) => Some(PositionSide::Short),
            (PositionMode::OneWay, _) => None,
        };

        // Step 7: order submission per policy.
        let order = match self.config.order_type {
            futures_core::config::OrderTypePolicy::Market => {
                self.submit_market_entry(&symbol, plan.side, qty, position_side).await?
            }
            futures_core::config::OrderTypePolicy::Limit => {
                match self
                    .submit_limit_entry(&symbol, plan.side, qty, mark_price)
                    .await
                {
                    Ok(order) => order,
                    Err(Error::OrderNotFilled(reason)) => {
                        if self.config.limit_order_auto_convert_to_market {
                            warn!(symbol = %symbol, reason = %reason, "limit entry unfilled, converting to market");
                            self.submit_market_entry(&symbol, plan.side, qty, position_side)
                                .await?
                        } else {
                            return Ok(EntryOutcome::OrderNotFilled(reason));
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        // Step 8: extract effective fill price/qty.
        let actual_price = order
            .effective_price()
            .ok_or_else(|| Error::DataInvariant("order carried no usable fill price".to_string()))?;
        let actual_qty = order.effective_qty();
        if actual_qty <= Decimal::ZERO {
            return Err(Error::DataInvariant("executed quantity is non-positive".to_string()));
        }

        // Step 9: persist Position.
        let position = Position::new_entry(
            Some(plan.id),
            symbol.clone(),
            plan.side,
            Some(order.order_id.clone()),
            actual_price,
            actual_qty,
            plan.leverage,
            plan.stop_loss_pct,
            plan.trailing_exit_pct,
            plan.max_slippage_pct,
        );
        self.positions.insert(&position).await?;

        // Step 10: audit log.
        self.logs
            .append(&ExecutionLog::new(
                Some(plan.id),
                Some(position.id),
                LogEventType::OrderFilled,
                symbol,
                plan.side,
                actual_price,
                actual_qty,
                Some(order.order_id.clone()),
                "FILLED".to_string(),
                None,
            ))
            .await?;

        info!(plan_id = %plan.id, position_id = %position.id, price = %actual_price, qty = %actual_qty, "entry executed");
        Ok(EntryOutcome::Filled(position))
    }

    async fn submit_market_entry(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
        position_side: Option<PositionSide>,
    ) -> Result<OrderResult> {
        let submitted = self
            .gateway
            .place_market_order(symbol, side, qty, reduce_only_for(position_side, false), position_side)
            .await?;

        let filled = if submitted.status == OrderStatus::New {
            self.poll_until_terminal(symbol, &submitted.order_id, Duration::from_millis(3_000))
                .await?
        } else {
            submitted
        };

        if !filled.status.is_filled() {
            return Err(Error::OrderNotFilled(format!(
                "market entry ended in status {:?}",
                filled.status
            )));
        }

        if let Some(avg_price) = filled.avg_price {
            let mark_price = self.gateway.get_mark_price(symbol).await.unwrap_or(avg_price);
            let slippage = ((avg_price - mark_price) / mark_price).abs();
            if slippage > self.config.max_slippage_pct {
                if self.config.slippage_reject_order {
                    return Err(Error::DataInvariant(format!(
                        "market entry slippage {slippage} exceeds max {}",
                        self.config.max_slippage_pct
                    )));
                }
                warn!(symbol, %slippage, "market entry slippage breach (logged, not rejected)");
            }
        }

        Ok(filled)
    }

    async fn submit_limit_entry(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
        price: Decimal,
    ) -> Result<OrderResult> {
        let submitted = self
            .gateway
            .place_limit_order(symbol, side, qty, price, "GTC")
            .await?;

        let timeout = Duration::from_secs(self.config.limit_order_timeout_seconds);
        let result = self.poll_until_terminal(symbol, &submitted.order_id, timeout).await;

        match result {
            Ok(order) if order.status.is_filled() => Ok(order),
            Ok(order) => {
                let _ = self.gateway.cancel_order(symbol, &submitted.order_id).await;
                Err(Error::OrderNotFilled(format!("limit entry ended in status {:?}", order.status)))
            }
            Err(_) => {
                let _ = self.gateway.cancel_order(symbol, &submitted.order_id).await;
                Err(Error::OrderNotFilled("limit entry poll timed out".to_string()))
            }
        }
    }

    /// Submits the closing MARKET order and polls to a terminal fill state
    /// for the close protocol (§4.F step 4-5). `budget` is the close
    /// protocol's own poll window (≈7.5 s per the spec), distinct from the
    /// entry-side budgets above.
    pub async fn execute_close_order(
        &self,
        symbol: &str,
        close_side: Side,
        qty: Decimal,
        position_side: Option<PositionSide>,
        budget: Duration,
    ) -> Result<OrderResult> {
        let submitted = self
            .gateway
            .place_market_order(symbol, close_side, qty, reduce_only_for(position_side, true), position_side)
            .await?;

        if submitted.status.is_filled() {
            return Ok(submitted);
        }

        match self.poll_until_terminal(symbol, &submitted.order_id, budget).await {
            Ok(order) if order.status.is_filled() => Ok(order),
            Ok(order) if order.status.is_terminal_non_fill() => {
                Err(Error::OrderNotFilled(format!("close order ended in status {:?}", order.status)))
            }
            Ok(order) => Ok(order),
            Err(_) if submitted.executed_qty > Decimal::ZERO => {
                // Poll errored on the final attempt; accept the submit
                // response's own evidence of a fill (§4.F step 5).
                Ok(submitted)
            }
            Err(e) => Err(e),
        }
    }

    /// Polls `getOrderStatus` at 500 ms cadence until a terminal state or the
    /// budget elapses.
    async fn poll_until_terminal(&self, symbol: &str, order_id: &str, budget: Duration) -> Result<OrderResult> {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            let order = self.gateway.get_order_status(symbol, order_id).await?;
            if order.status.is_filled() || order.status.is_terminal_non_fill() {
                return Ok(order);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(order);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    pub async fn mark_executed(&self, plan_id: uuid::Uuid) -> Result<()> {
        self.plans.mark_executed(plan_id).await
    }

    pub async fn mark_failed(&self, plan_id: uuid::Uuid) -> Result<()> {
        self.plans.mark_failed(plan_id).await
    }
}

fn reduce_only_for(position_side: Option<PositionSide>, is_close: bool) -> Option<bool> {
    match position_side {
        Some(_) => None, // HEDGE mode forbids reduceOnly.
        None => Some(is_close),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_gate_rejects_denylisted_symbol() {
        let gate = RiskGate::new(vec!["SCAMUSDT".to_string()], 20);
        assert!(gate.check_trading_allowed("SCAMUSDT", 5).is_err());
    }

    #[test]
    fn risk_gate_rejects_excess_leverage() {
        let gate = RiskGate::new(vec![], 20);
        assert!(gate.check_trading_allowed("BTCUSDT", 25).is_err());
    }

    #[test]
    fn risk_gate_allows_within_bounds() {
        let gate = RiskGate::new(vec![], 20);
        assert!(gate.check_trading_allowed("BTCUSDT", 10).is_ok());
    }
}
