//! Position Monitor & Reconciler (component F, §4.F). Implements
//! `trading_engine::PositionMonitor` so the Scheduler can drive both the
//! per-tick exit evaluation and the periodic exchange reconciliation without
//! depending on this crate.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashSet;
use futures_core::api::gateway::{ExchangePosition, Gateway};
use futures_core::api::price_stream::PriceStream;
use futures_core::config::TradingConfig;
use futures_core::db::execution_logs::ExecutionLogRepository;
use futures_core::db::positions::PositionRepository;
use futures_core::types::execution_log::{ExecutionLog, LogEventType};
use futures_core::types::manual_plan::Side;
use futures_core::types::order::{floor_to_quantum, PositionMode, PositionSide};
use futures_core::types::position::{ExitReason, Position};
use futures_core::{Error, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use trading_engine::scheduler::PositionMonitor;
use trading_engine::ExecutionEngine;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The close protocol's own poll budget (§4.F step 5): ~7.5 s after the
/// 200 ms grace already spent on the absence confirmation.
const CLOSE_POLL_BUDGET: Duration = Duration::from_millis(7_500);
const ABSENCE_CONFIRM_DELAY: Duration = Duration::from_millis(200);
const DOWNTIME_RECOVERY_THRESHOLD_SECS: i64 = 300;
const RECENT_CLOSE_LOG_WINDOW_MINS: i64 = 5;

#[derive(Clone)]
pub struct Reconciler {
    gateway: Arc<Gateway>,
    price_stream: Arc<PriceStream>,
    engine: Arc<ExecutionEngine>,
    positions: PositionRepository,
    logs: ExecutionLogRepository,
    trading_config: TradingConfig,
    /// In-process lock keyed by position id, mirroring §5's
    /// `closing_positions` set — only the monitor/reconciler writes it.
    closing: Arc<DashSet<Uuid>>,
}

impl Reconciler {
    pub fn new(
        gateway: Arc<Gateway>,
        price_stream: Arc<PriceStream>,
        engine: Arc<ExecutionEngine>,
        positions: PositionRepository,
        logs: ExecutionLogRepository,
        trading_config: TradingConfig,
    ) -> Self {
        Self {
            gateway,
            price_stream,
            engine,
            positions,
            logs,
            trading_config,
            closing: Arc::new(DashSet::new()),
        }
    }

    async fn current_price(&self, symbol: &str, fallback: Decimal) -> Decimal {
        if let Some(p) = self.price_stream.get_price(symbol) {
            return p;
        }
        match self.gateway.get_mark_price(symbol).await {
            Ok(p) => p,
            Err(e) => {
                warn!(symbol, error = %e, "mark price unavailable, using fallback");
                fallback
            }
        }
    }

    async fn evaluate_position(&self, mut position: Position) -> Result<()> {
        let current = self.current_price(&position.symbol, position.entry_price).await;
        let captured_high = position.highest_price;
        let captured_low = position.lowest_price;

        let exit_reason = position.evaluate_exit(current, captured_high, captured_low);
        position.update_extrema(current);

        match exit_reason {
            Some(reason) => self.close_position(position.id, reason).await,
            None => {
                self.positions
                    .update_extrema(position.id, position.highest_price, position.lowest_price, position.last_check_time)
                    .await
            }
        }
    }

    /// Full close protocol (§4.F steps 1-6), triggered by a stop-loss or
    /// trailing-stop exit decision made this tick.
    pub async fn close_position(&self, position_id: Uuid, reason: ExitReason) -> Result<()> {
        if !self.closing.insert(position_id) {
            return Ok(());
        }
        let outcome = self.close_position_inner(position_id, reason).await;
        self.closing.remove(&position_id);
        outcome
    }

    async fn close_position_inner(&self, position_id: Uuid, reason: ExitReason) -> Result<()> {
        let position = match self.positions.get(position_id).await? {
            Some(p) if p.is_active() => p,
            _ => return Ok(()),
        };

        let open = match self.gateway.get_open_positions().await {
            Some(open) => open,
            None => {
                warn!(%position_id, "open positions unknown, deferring close to next tick");
                return Ok(());
            }
        };

        if let Some(exch) = find_match(&open, &position) {
            return self.close_via_order(position, exch, reason).await;
        }

        // Two-stage absence confirmation (§4.F step 3).
        tokio::time::sleep(ABSENCE_CONFIRM_DELAY).await;
        let open2 = match self.gateway.get_open_positions().await {
            Some(open) => open,
            None => {
                warn!(%position_id, "open positions unknown on confirmation check, deferring close");
                return Ok(());
            }
        };

        match find_match(&open2, &position) {
            Some(exch) => self.close_via_order(position, exch, reason).await,
            None => self.finalize_absent(position).await,
        }
    }

    async fn close_via_order(&self, mut position: Position, exch: ExchangePosition, reason: ExitReason) -> Result<()> {
        let filters = self.gateway.get_symbol_filters(&position.symbol).await.unwrap_or_default();
        let qty = floor_to_quantum(exch.quantity(), filters.step_size);
        if qty <= Decimal::ZERO {
            warn!(position_id = %position.id, "exchange-reported quantity floors to zero, skipping close");
            return Ok(());
        }

        let close_side = position.side.opposite();
        let position_side = self.position_side_for(position.side).await?;

        match self
            .engine
            .execute_close_order(&position.symbol, close_side, qty, position_side, CLOSE_POLL_BUDGET)
            .await
        {
            Ok(order) => {
                let actual_price = order.effective_price().unwrap_or(exch.mark_price);
                let actual_qty = order.effective_qty();
                position.close(actual_price, actual_qty, reason);
                self.positions.update(&position).await?;
                self.append_close_log(&position).await?;
                self.maybe_unsubscribe(&position.symbol).await;
                info!(position_id = %position.id, ?reason, "position closed");
                Ok(())
            }
            Err(Error::OrderNotFilled(msg)) => {
                warn!(position_id = %position.id, msg, "close order did not fill, will retry next tick");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn position_side_for(&self, side: Side) -> Result<Option<PositionSide>> {
        let mode = self.gateway.get_position_mode().await?;
        Ok(match (mode, side) {
            (PositionMode::Hedge, Side::Buy) => Some(PositionSide::Long),
            (PositionMode::Hedge, Side::Sell) => Some(PositionSide::Short),
            (PositionMode::OneWay, _) => None,
        })
    }

    /// Closes a position locally without touching the exchange — used both
    /// by absence finalization and duplicate collapse, where a real order
    /// would either be redundant (the exchange already has no such position)
    /// or actively wrong (it would close the surviving twin's real position).
    async fn finalize_without_order(&self, mut position: Position, reason: ExitReason) -> Result<()> {
        let exit_price = self.current_price(&position.symbol, position.entry_price).await;
        position.close(exit_price, position.entry_quantity, reason);
        self.positions.update(&position).await?;
        self.append_close_log(&position).await
    }

    async fn finalize_absent(&self, position: Position) -> Result<()> {
        let reason = self.determine_absence_reason(position.id).await?;
        self.finalize_without_order(position, reason).await
    }

    /// `external_closed` unless no `order_filled` log exists for this
    /// position (`not_executed`), or a recent `position_closed` log already
    /// recorded a more specific reason to adopt (§4.F step 3).
    async fn determine_absence_reason(&self, position_id: Uuid) -> Result<ExitReason> {
        let since = Utc::now() - ChronoDuration::minutes(RECENT_CLOSE_LOG_WINDOW_MINS);
        if let Some(log) = self.logs.recent_position_closed(position_id, since).await? {
            if let Some(reason) = log
                .payload
                .as_ref()
                .and_then(|p| p.get("exit_reason"))
                .and_then(|v| serde_json::from_value::<ExitReason>(v.clone()).ok())
            {
                return Ok(reason);
            }
        }

        if self.logs.latest_order_filled_for_position(position_id).await?.is_some() {
            Ok(ExitReason::ExternalClosed)
        } else {
            Ok(ExitReason::NotExecuted)
        }
    }

    async fn append_close_log(&self, position: &Position) -> Result<()> {
        let payload = serde_json::json!({
            "exit_reason": position.exit_reason,
            "realized_pnl": position.realized_pnl(),
        });
        self.logs
            .append(&ExecutionLog::new(
                position.plan_id,
                Some(position.id),
                LogEventType::PositionClosed,
                position.symbol.clone(),
                position.side,
                position.exit_price.unwrap_or_default(),
                position.exit_quantity.unwrap_or_default(),
                position.order_id.clone(),
                "CLOSED".to_string(),
                Some(payload),
            ))
            .await
    }

    async fn maybe_unsubscribe(&self, symbol: &str) {
        match self.positions.get_active().await {
            Ok(active) => {
                if !active.iter().any(|p| p.symbol == symbol) {
                    self.price_stream.unsubscribe(symbol).await;
                }
            }
            Err(e) => warn!(symbol, error = %e, "failed to check remaining active positions before unsubscribe"),
        }
    }

    /// Reconciliation step 2: collapse duplicate ACTIVE rows per
    /// `(symbol, side)`. The exchange only ever holds one physical position
    /// per pair, so losers are finalized locally — never via a real order.
    async fn collapse_duplicates(&self) -> Result<()> {
        let active = self.positions.get_active().await?;

        let mut groups: HashMap<(String, Side), Vec<Position>> = HashMap::new();
        for p in active {
            groups.entry((p.symbol.clone(), p.side)).or_default().push(p);
        }

        for (_, group) in groups {
            if group.len() < 2 {
                continue;
            }

            let customized: Vec<&Position> = group.iter().filter(|p| self.is_customized(p)).collect();
            let pool: Vec<&Position> = if customized.is_empty() { group.iter().collect() } else { customized };
            let winner_id = pool
                .into_iter()
                .max_by_key(|p| p.entry_time)
                .map(|p| p.id)
                .expect("group has at least 2 entries");

            for position in group {
                if position.id == winner_id {
                    continue;
                }
                if let Err(e) = self.finalize_without_order(position, ExitReason::DuplicateMerged).await {
                    error!(error = %e, "failed to collapse duplicate position");
                }
            }
        }

        Ok(())
    }

    /// A position's risk params are "user-customized" if they diverge from
    /// the engine's current configured defaults (§4.F step 2).
    fn is_customized(&self, p: &Position) -> bool {
        p.stop_loss_pct != self.trading_config.default_stop_loss_pct
            || p.trailing_exit_pct != self.trading_config.default_trailing_exit_pct
            || p.max_slippage_pct != self.trading_config.max_slippage_pct
    }

    /// Reconciliation step 3: refresh or adopt each exchange-reported
    /// position.
    async fn reconcile_exchange_position(&self, exch: ExchangePosition, local_match: Option<Position>) -> Result<()> {
        match local_match {
            Some(mut position) => {
                if position.entry_price != exch.entry_price
                    || position.entry_quantity != exch.quantity()
                    || position.leverage != exch.leverage
                {
                    position.entry_price = exch.entry_price;
                    position.entry_quantity = exch.quantity();
                    position.leverage = exch.leverage;
                }
                // Risk params are never touched here — they were already
                // user-customized or left at their entry-time defaults, and
                // forcibly restoring them is simply not overwriting them.
                self.maybe_recover_extrema(&mut position).await;
                position.last_check_time = Utc::now();
                self.positions.update(&position).await
            }
            None => {
                let current = self.current_price(&exch.symbol, exch.mark_price).await;
                let position = Position::new_external(
                    exch.symbol.clone(),
                    exch.side,
                    exch.entry_price,
                    exch.quantity(),
                    current,
                    exch.leverage,
                    self.trading_config.default_stop_loss_pct,
                    self.trading_config.default_trailing_exit_pct,
                    self.trading_config.max_slippage_pct,
                );
                info!(symbol = %exch.symbol, side = ?exch.side, "discovered external position");
                self.positions.insert(&position).await
            }
        }
    }

    /// Reconciliation step 4: a locally-active position the exchange no
    /// longer reports. Re-confirms absence independently of step 1's
    /// snapshot (which may be stale by the time this runs) before finalizing.
    async fn reconcile_absent(&self, position: Position) -> Result<()> {
        if !self.closing.insert(position.id) {
            return Ok(());
        }
        let outcome = self.reconcile_absent_inner(position).await;
        self.closing.remove(&outcome.0);
        outcome.1
    }

    async fn reconcile_absent_inner(&self, position: Position) -> (Uuid, Result<()>) {
        let id = position.id;
        tokio::time::sleep(ABSENCE_CONFIRM_DELAY).await;

        let open = match self.gateway.get_open_positions().await {
            Some(o) => o,
            None => return (id, Ok(())), // unknown, leave it for the next sync tick
        };

        if find_match(&open, &position).is_some() {
            return (id, Ok(())); // reappeared since step 1's snapshot
        }

        (id, self.finalize_absent(position).await)
    }

    /// Downtime extrema recovery (§4.F): if the gap since the last tick
    /// exceeds the threshold and either extremum is still null, backfill
    /// from klines spanning the gap.
    async fn maybe_recover_extrema(&self, position: &mut Position) {
        let gap = Utc::now() - position.last_check_time;
        if gap.num_seconds() <= DOWNTIME_RECOVERY_THRESHOLD_SECS {
            return;
        }
        if position.highest_price.is_some() && position.lowest_price.is_some() {
            return;
        }

        let (interval, limit) = kline_interval_for_span(gap);
        let recovered = self
            .gateway
            .get_klines(&position.symbol, interval, limit, Some(position.last_check_time), None)
            .await;

        match recovered {
            Ok(klines) if !klines.is_empty() => {
                let recovered_high = klines.iter().map(|k| k.high).fold(Decimal::MIN, Decimal::max);
                let recovered_low = klines.iter().map(|k| k.low).fold(Decimal::MAX, Decimal::min);
                position.highest_price = Some(match position.highest_price {
                    Some(h) => h.max(recovered_high),
                    None => recovered_high,
                });
                position.lowest_price = Some(match position.lowest_price {
                    Some(l) => l.min(recovered_low),
                    None => recovered_low,
                });
            }
            _ => {
                if position.highest_price.is_none() {
                    position.highest_price = Some(position.entry_price);
                }
                if position.lowest_price.is_none() {
                    position.lowest_price = Some(position.entry_price);
                }
            }
        }
    }
}

fn find_match(open: &[ExchangePosition], position: &Position) -> Option<ExchangePosition> {
    open.iter().find(|e| e.symbol == position.symbol && e.side == position.side).cloned()
}

/// Interval/limit selection for downtime kline recovery, by gap span.
fn kline_interval_for_span(gap: ChronoDuration) -> (&'static str, u32) {
    let hours = gap.num_seconds() as f64 / 3600.0;
    if hours <= 1.0 {
        ("1m", 1000)
    } else if hours <= 8.0 {
        ("1m", 500)
    } else if hours <= 24.0 {
        ("5m", 500)
    } else {
        ("15m", 500)
    }
}

#[async_trait]
impl PositionMonitor for Reconciler {
    async fn run_monitor_tick(&self, worker_permits: Arc<Semaphore>) -> Result<usize> {
        let active = self.positions.get_active().await?;
        let count = active.len();

        let mut handles = Vec::with_capacity(active.len());
        for position in active {
            let permit = worker_permits.clone();
            let this = self.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                if let Err(e) = this.evaluate_position(position).await {
                    error!(error = %e, "monitor tick: position evaluation failed");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        Ok(count)
    }

    async fn run_sync_tick(&self, worker_permits: Arc<Semaphore>) -> Result<()> {
        self.collapse_duplicates().await?;

        let open = match self.gateway.get_open_positions().await {
            Some(o) => o,
            None => {
                warn!("reconciliation: open positions unknown, skipping this sync tick");
                return Ok(());
            }
        };

        let local_active = self.positions.get_active().await?;

        let mut handles = Vec::with_capacity(open.len());
        for exch in open.iter().cloned() {
            let local_match = local_active
                .iter()
                .find(|p| p.symbol == exch.symbol && p.side == exch.side)
                .cloned();
            let permit = worker_permits.clone();
            let this = self.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                if let Err(e) = this.reconcile_exchange_position(exch, local_match).await {
                    error!(error = %e, "sync tick: reconcile exchange position failed");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        for position in local_active {
            if find_match(&open, &position).is_none() {
                let permit = worker_permits.clone();
                let this = self.clone();
                tokio::spawn(async move {
                    let _permit = permit.acquire_owned().await;
                    if let Err(e) = this.reconcile_absent(position).await {
                        error!(error = %e, "sync tick: absence reconciliation failed");
                    }
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_core::types::manual_plan::Side;
    use futures_core::types::position::Position;

    fn trading_config() -> TradingConfig {
        futures_core::config::Config::test_config().trading
    }

    fn position_with(stop_loss_pct: Decimal, trailing_pct: Decimal, entry_time_offset_secs: i64) -> Position {
        let mut p = Position::new_entry(
            None,
            "BTCUSDT".into(),
            Side::Buy,
            None,
            Decimal::new(100, 0),
            Decimal::new(1, 0),
            5,
            stop_loss_pct,
            trailing_pct,
            Decimal::new(5, 3),
        );
        p.entry_time = Utc::now() + ChronoDuration::seconds(entry_time_offset_secs);
        p
    }

    #[test]
    fn kline_interval_picks_shortest_bucket_within_an_hour() {
        assert_eq!(kline_interval_for_span(ChronoDuration::minutes(30)), ("1m", 1000));
    }

    #[test]
    fn kline_interval_escalates_past_a_day() {
        assert_eq!(kline_interval_for_span(ChronoDuration::hours(30)), ("15m", 500));
    }

    #[test]
    fn is_customized_detects_non_default_stop_loss() {
        let cfg = trading_config();
        let gateway = Arc::new(Gateway::new(
            futures_core::config::Config::test_config().binance,
            futures_core::config::Config::test_config().market_data,
        ));
        // Exercise `is_customized` without building a full Reconciler's async
        // dependencies by constructing one with a dummy price stream is not
        // possible synchronously (PriceStream::start spawns); this test only
        // needs the pure predicate, so it inlines the comparison logic.
        let customized = position_with(cfg.default_stop_loss_pct + Decimal::new(1, 2), cfg.default_trailing_exit_pct, 0);
        let not_customized = position_with(cfg.default_stop_loss_pct, cfg.default_trailing_exit_pct, 0);
        let is_customized = |p: &Position| {
            p.stop_loss_pct != cfg.default_stop_loss_pct
                || p.trailing_exit_pct != cfg.default_trailing_exit_pct
                || p.max_slippage_pct != cfg.max_slippage_pct
        };
        assert!(is_customized(&customized));
        assert!(!is_customized(&not_customized));
        drop(gateway);
    }

    #[test]
    fn find_match_respects_symbol_and_side() {
        let position = position_with(Decimal::new(5, 2), Decimal::new(1, 1), 0);
        let open = vec![ExchangePosition {
            symbol: "BTCUSDT".into(),
            side: Side::Sell,
            position_amt: Decimal::new(-1, 0),
            entry_price: Decimal::new(100, 0),
            mark_price: Decimal::new(100, 0),
            leverage: 5,
            update_time: Utc::now(),
        }];
        assert!(find_match(&open, &position).is_none());

        let open_match = vec![ExchangePosition {
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            position_amt: Decimal::new(1, 0),
            entry_price: Decimal::new(100, 0),
            mark_price: Decimal::new(100, 0),
            leverage: 5,
            update_time: Utc::now(),
        }];
        assert!(find_match(&open_match, &position).is_some());
    }
}
