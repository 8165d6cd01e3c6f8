//! Cross-crate integration tests for the futures listing engine.
//!
//! These exercise seams between crates — `trading-engine`'s `RiskGate`
//! gating entry, `risk-manager`'s `Reconciler` wiring into the scheduler's
//! `PositionMonitor` trait object, `auth`'s key lifecycle, and the
//! `futures-core` domain types flowing through a simulated plan → position
//! → execution-log chain — rather than re-testing what each crate's own
//! unit tests already cover in isolation.

use chrono::Utc;
use futures_core::api::gateway::{Gateway, GatewayHealth};
use futures_core::config::{BinanceConfig, MarketDataConfig};
use futures_core::types::execution_log::{ExecutionLog, LogEventType};
use futures_core::types::manual_plan::{ManualPlan, PlanStatus, Side};
use futures_core::types::position::{ExitReason, Position, PositionStatus};
use rust_decimal::Decimal;
use trading_engine::{PositionMonitor, RiskGate};

fn test_binance_config() -> BinanceConfig {
    BinanceConfig {
        api_key: "test-key".to_string(),
        api_secret: "test-secret".to_string(),
        base_url: "https://testnet.binancefuture.com".to_string(),
        ws_base_url: "wss://stream.binancefuture.com".to_string(),
        recv_window_ms: 5_000,
    }
}

fn test_market_data_config() -> MarketDataConfig {
    MarketDataConfig {
        price_cache_ttl_secs: 2,
        balance_cache_ttl_secs: 5,
        http_timeout_secs: 10,
        max_retries: 3,
        retry_backoff_ms: 200,
        rest_fail_threshold: 5,
        rest_fail_cooldown_secs: 30,
        websocket_price_enabled: false,
        max_single_fetch: 10,
    }
}

/// A freshly-built `Gateway` has no recorded REST failures, so `health()`
/// should report "ok" without ever making a network call.
#[test]
fn gateway_starts_healthy_with_no_failures() {
    let gateway = Gateway::new(test_binance_config(), test_market_data_config());
    let health: GatewayHealth = gateway.health();
    assert_eq!(health.status, "ok");
    assert_eq!(health.failure_streak, 0);
    assert!(health.last_failure_at.is_none());
}

/// `Reconciler` must implement `trading_engine::PositionMonitor` so the
/// Scheduler can hold it as `Arc<dyn PositionMonitor>` without depending on
/// risk-manager directly. This is a compile-time check of that seam; it
/// fails to build rather than fails at runtime if the trait impl is ever
/// dropped or its signature drifts.
fn assert_is_position_monitor<T: PositionMonitor>() {}

#[test]
fn reconciler_satisfies_position_monitor_contract() {
    assert_is_position_monitor::<risk_manager::Reconciler>();
}

/// The pre-trade gate sits between plan claiming and order submission
/// (component D). A denylisted symbol or an over-ceiling leverage request
/// must never reach the gateway.
#[test]
fn risk_gate_blocks_plan_execution_inputs_it_should_block() {
    let gate = RiskGate::new(vec!["SCAMUSDT".to_string()], 20);

    assert!(gate.check_trading_allowed("SCAMUSDT", 5).is_err());
    assert!(gate.check_trading_allowed("BTCUSDT", 25).is_err());
    assert!(gate.check_trading_allowed("BTCUSDT", 10).is_ok());
}

/// A plan's lifecycle as the scheduler would walk it: pending and due,
/// then no longer due once claimed past `Pending`.
#[test]
fn manual_plan_lifecycle_due_to_claimed() {
    let plan = ManualPlan::new(
        "btc".to_string(),
        Side::Buy,
        Utc::now() - chrono::Duration::seconds(1),
        10,
        Decimal::new(5, 1),
        Decimal::new(5, 2),
        Decimal::new(1, 1),
        Decimal::new(5, 3),
        Some("integration test plan".to_string()),
    );

    assert_eq!(plan.symbol, "BTCUSDT");
    assert_eq!(plan.status, PlanStatus::Pending);
    assert!(plan.is_due(Utc::now()));

    let mut claimed = plan.clone();
    claimed.status = PlanStatus::Executing;
    assert!(!claimed.is_due(Utc::now()));
}

/// Simulates the executor's entry → audit-log hand-off (§4.D steps 9-10)
/// without a real gateway: build a `Position` from plan parameters, then an
/// `ExecutionLog` entry referencing both the plan and the position, the way
/// `ExecutionEngine::execute_plan` does after a fill.
#[test]
fn plan_fill_produces_consistent_position_and_log() {
    let plan = ManualPlan::new(
        "ETH".to_string(),
        Side::Buy,
        Utc::now(),
        5,
        Decimal::new(5, 1),
        Decimal::new(5, 2),
        Decimal::new(1, 1),
        Decimal::new(5, 3),
        None,
    );

    let fill_price = Decimal::new(3500, 0);
    let fill_qty = Decimal::new(2, 0);

    let position = Position::new_entry(
        Some(plan.id),
        plan.symbol.clone(),
        plan.side,
        Some("order-1".to_string()),
        fill_price,
        fill_qty,
        plan.leverage,
        plan.stop_loss_pct,
        plan.trailing_exit_pct,
        plan.max_slippage_pct,
    );

    let log = ExecutionLog::new(
        Some(plan.id),
        Some(position.id),
        LogEventType::OrderFilled,
        plan.symbol.clone(),
        plan.side,
        fill_price,
        fill_qty,
        Some("order-1".to_string()),
        "FILLED".to_string(),
        None,
    );

    assert_eq!(position.plan_id, Some(plan.id));
    assert_eq!(position.status, PositionStatus::Active);
    assert_eq!(log.plan_id, Some(plan.id));
    assert_eq!(log.position_id, Some(position.id));
    assert_eq!(log.event_type, LogEventType::OrderFilled);
    assert_eq!(log.price, fill_price);
}

/// Closing a position through a trailing-stop exit, then building the
/// corresponding `PositionClosed` log entry (§4.F step 4-6), matches the
/// realized-pnl sign convention for a long.
#[test]
fn position_close_and_log_round_trip() {
    let mut position = Position::new_entry(
        None,
        "BTCUSDT".to_string(),
        Side::Buy,
        Some("order-9".to_string()),
        Decimal::new(100, 0),
        Decimal::new(1, 0),
        5,
        Decimal::new(5, 2),
        Decimal::new(1, 1),
        Decimal::new(5, 3),
    );
    position.update_extrema(Decimal::new(120, 0));

    position.close(Decimal::new(108, 0), Decimal::new(1, 0), ExitReason::TrailingStop);

    assert_eq!(position.status, PositionStatus::Closed);
    assert_eq!(position.exit_reason, Some(ExitReason::TrailingStop));
    assert_eq!(position.realized_pnl(), Some(Decimal::new(8, 0)));

    let log = ExecutionLog::new(
        position.plan_id,
        Some(position.id),
        LogEventType::PositionClosed,
        position.symbol.clone(),
        position.side,
        position.exit_price.unwrap(),
        position.exit_quantity.unwrap(),
        position.order_id.clone(),
        "CLOSED".to_string(),
        None,
    );
    assert_eq!(log.event_type, LogEventType::PositionClosed);
    assert_eq!(log.price, Decimal::new(108, 0));
}

/// The operator API's auth flow: register a pre-shared key the way
/// `main.rs` does from `OPERATOR_API_KEY`, confirm it authenticates, then
/// confirm a second, never-issued key does not.
#[tokio::test]
async fn api_key_auth_register_and_authenticate() {
    let auth = auth::ApiKeyAuth::new();
    auth.register_preshared("super-secret-operator-key", "operator").await;

    let authenticated = auth.authenticate("super-secret-operator-key").await;
    assert!(authenticated.is_some());
    assert_eq!(authenticated.unwrap().name, "operator");

    assert!(auth.authenticate("not-the-right-key").await.is_none());
}

/// A dynamically-issued key can be revoked, after which it no longer
/// authenticates even though its hash is still present in the store.
#[tokio::test]
async fn api_key_revocation_takes_effect_immediately() {
    let auth = auth::ApiKeyAuth::new();
    let (api_key, plain_key) = auth.create_key("on-call laptop").await;

    assert!(auth.authenticate(&plain_key).await.is_some());
    assert!(auth.revoke_key(api_key.id).await);
    assert!(auth.authenticate(&plain_key).await.is_none());
}
