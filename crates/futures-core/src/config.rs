//! Configuration for the futures execution engine.

use crate::{Error, Result};
use serde::Deserialize;
use std::env;

/// Top-level application configuration, assembled from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub binance: BinanceConfig,
    pub trading: TradingConfig,
    pub scheduling: SchedulingConfig,
    pub market_data: MarketDataConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub ws_base_url: String,
    pub recv_window_ms: u64,
}

/// Per-plan defaults; a `ManualPlan` may override all of these.
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    pub order_type: OrderTypePolicy,
    pub max_slippage_pct: rust_decimal::Decimal,
    /// If true, a MARKET fill whose realized slippage exceeds `max_slippage_pct`
    /// aborts the entry with `DataInvariant` instead of only logging a warning.
    pub slippage_reject_order: bool,
    pub limit_order_timeout_seconds: u64,
    /// If true, a LIMIT order that times out or lands in a terminal non-fill
    /// state is resubmitted through the MARKET path.
    pub limit_order_auto_convert_to_market: bool,
    pub max_order_amount: Option<rust_decimal::Decimal>,
    pub default_leverage: u32,
    pub default_position_pct: rust_decimal::Decimal,
    pub default_stop_loss_pct: rust_decimal::Decimal,
    pub default_trailing_exit_pct: rust_decimal::Decimal,
    /// Leverage ceiling enforced by the pre-trade risk gate.
    pub max_leverage: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderTypePolicy {
    Market,
    Limit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulingConfig {
    /// Floor 300ms per the original scheduler's minimum check interval.
    pub manual_plan_check_interval_ms: u64,
    pub manual_plan_precision_threshold_secs: i64,
    pub manual_plan_precision_mode: bool,
    pub websocket_subscribe_before_minutes: i64,
    /// Floor 500ms with active positions, else relaxes to `monitor_interval_idle_ms`.
    pub monitor_interval_active_ms: u64,
    pub monitor_interval_idle_ms: u64,
    pub sync_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataConfig {
    pub price_cache_ttl_secs: i64,
    pub balance_cache_ttl_secs: i64,
    pub http_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub rest_fail_threshold: u32,
    pub rest_fail_cooldown_secs: i64,
    pub websocket_price_enabled: bool,
    /// Cap on individual REST fallbacks inside one `get_mark_prices_batch` call.
    pub max_single_fetch: usize,
}

impl Config {
    /// Load configuration from environment variables, `.env` first if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .map_err(|_| Error::Config("DATABASE_URL environment variable not set".to_string()))?,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_parse("SERVER_PORT", 3000),
            },
            binance: BinanceConfig {
                api_key: env::var("BINANCE_API_KEY").unwrap_or_default(),
                api_secret: env::var("BINANCE_API_SECRET").unwrap_or_default(),
                base_url: env::var("BINANCE_BASE_URL")
                    .unwrap_or_else(|_| "https://fapi.binance.com".to_string()),
                ws_base_url: env::var("BINANCE_WS_BASE_URL")
                    .unwrap_or_else(|_| "wss://fstream.binance.com".to_string()),
                recv_window_ms: env_parse("BINANCE_RECV_WINDOW_MS", 5000),
            },
            trading: TradingConfig {
                order_type: match env::var("ORDER_TYPE").as_deref() {
                    Ok("LIMIT") => OrderTypePolicy::Limit,
                    _ => OrderTypePolicy::Market,
                },
                max_slippage_pct: env_parse_decimal("MAX_SLIPPAGE_PCT", "0.005"),
                slippage_reject_order: env::var("SLIPPAGE_REJECT_ORDER")
                    .map(|v| v == "true")
                    .unwrap_or(false),
                limit_order_timeout_seconds: env_parse("LIMIT_ORDER_TIMEOUT_SECONDS", 10),
                limit_order_auto_convert_to_market: env::var("LIMIT_ORDER_AUTO_CONVERT_TO_MARKET")
                    .map(|v| v != "false")
                    .unwrap_or(true),
                max_order_amount: env::var("MAX_ORDER_AMOUNT").ok().and_then(|s| s.parse().ok()),
                default_leverage: env_parse("DEFAULT_LEVERAGE", 5),
                default_position_pct: env_parse_decimal("DEFAULT_POSITION_PCT", "0.3"),
                default_stop_loss_pct: env_parse_decimal("DEFAULT_STOP_LOSS_PCT", "0.05"),
                default_trailing_exit_pct: env_parse_decimal("DEFAULT_TRAILING_EXIT_PCT", "0.1"),
                max_leverage: env_parse("MAX_LEVERAGE", 20),
            },
            scheduling: SchedulingConfig {
                manual_plan_check_interval_ms: env_parse("MANUAL_PLAN_CHECK_INTERVAL_MS", 300).max(300),
                manual_plan_precision_threshold_secs: env_parse(
                    "MANUAL_PLAN_PRECISION_THRESHOLD_SECS",
                    60,
                ),
                manual_plan_precision_mode: env::var("MANUAL_PLAN_PRECISION_MODE")
                    .map(|v| v != "false")
                    .unwrap_or(true),
                websocket_subscribe_before_minutes: env_parse("WEBSOCKET_SUBSCRIBE_BEFORE_MINUTES", 5),
                monitor_interval_active_ms: env_parse("MONITOR_INTERVAL_ACTIVE_MS", 500).max(500),
                monitor_interval_idle_ms: env_parse("MONITOR_INTERVAL_IDLE_MS", 2000),
                sync_interval_secs: env_parse("SYNC_INTERVAL_SECS", 5),
            },
            market_data: MarketDataConfig {
                price_cache_ttl_secs: env_parse("PRICE_CACHE_TTL_SECS", 5),
                balance_cache_ttl_secs: env_parse("BALANCE_CACHE_TTL_SECS", 10),
                http_timeout_secs: env_parse("BINANCE_HTTP_TIMEOUT_SECS", 10),
                max_retries: env_parse("BINANCE_MAX_RETRIES", 3),
                retry_backoff_ms: env_parse("BINANCE_RETRY_BACKOFF_MS", 500),
                rest_fail_threshold: env_parse("BINANCE_REST_FAIL_THRESHOLD", 5),
                rest_fail_cooldown_secs: env_parse("BINANCE_REST_FAIL_COOLDOWN_SECS", 300),
                websocket_price_enabled: env::var("WEBSOCKET_PRICE_ENABLED")
                    .map(|v| v != "false")
                    .unwrap_or(true),
                max_single_fetch: env_parse("MAX_SINGLE_FETCH", 3),
            },
        })
    }

    /// Configuration for tests — never touches the environment.
    #[cfg(any(test, feature = "test-util"))]
    pub fn test_config() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/futures_engine_test".to_string(),
                max_connections: 2,
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            binance: BinanceConfig {
                api_key: "test-key".to_string(),
                api_secret: "test-secret".to_string(),
                base_url: "https://fapi.binance.com".to_string(),
                ws_base_url: "wss://fstream.binance.com".to_string(),
                recv_window_ms: 5000,
            },
            trading: TradingConfig {
                order_type: OrderTypePolicy::Market,
                max_slippage_pct: "0.005".parse().unwrap(),
                slippage_reject_order: false,
                limit_order_timeout_seconds: 10,
                limit_order_auto_convert_to_market: true,
                max_order_amount: None,
                default_leverage: 5,
                default_position_pct: "0.3".parse().unwrap(),
                default_stop_loss_pct: "0.05".parse().unwrap(),
                default_trailing_exit_pct: "0.1".parse().unwrap(),
                max_leverage: 20,
            },
            scheduling: SchedulingConfig {
                manual_plan_check_interval_ms: 300,
                manual_plan_precision_threshold_secs: 60,
                manual_plan_precision_mode: true,
                websocket_subscribe_before_minutes: 5,
                monitor_interval_active_ms: 500,
                monitor_interval_idle_ms: 2000,
                sync_interval_secs: 5,
            },
            market_data: MarketDataConfig {
                price_cache_ttl_secs: 5,
                balance_cache_ttl_secs: 10,
                http_timeout_secs: 10,
                max_retries: 3,
                retry_backoff_ms: 500,
                rest_fail_threshold: 5,
                rest_fail_cooldown_secs: 300,
                websocket_price_enabled: true,
                max_single_fetch: 3,
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_parse_decimal(key: &str, default: &str) -> rust_decimal::Decimal {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| default.parse().unwrap())
}
