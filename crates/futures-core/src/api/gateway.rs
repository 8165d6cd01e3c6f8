//! Signed REST access to the USD-margined perpetual-futures venue: balances,
//! mark prices, klines, order submit/cancel/query, position snapshot,
//! leverage and position-mode settings (component A, §4.A).
//!
//! Retries with exponential backoff and tracks a process-wide failure streak
//! for health reporting. All caches are owned by this struct — never global
//! statics — so a test harness can always build a fresh `Gateway`.

use crate::config::{BinanceConfig, MarketDataConfig};
use super::price_stream::PriceCache;
use crate::types::manual_plan::Side;
use crate::types::order::{floor_to_quantum, OrderResult, OrderStatus, PositionMode, PositionSide, SymbolFilters};
use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// A position as reported by `/fapi/v2/positionRisk`, sign-encoded: a
/// negative `position_amt` is a short.
#[derive(Debug, Clone)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: Side,
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub leverage: u32,
    pub update_time: DateTime<Utc>,
}

impl ExchangePosition {
    pub fn quantity(&self) -> Decimal {
        self.position_amt.abs()
    }
}

/// One OHLC candle from `/fapi/v1/klines`.
#[derive(Debug, Clone, Copy)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub high: Decimal,
    pub low: Decimal,
}

/// Queryable REST health snapshot for the dashboard's composition endpoints.
#[derive(Debug, Clone)]
pub struct GatewayHealth {
    pub status: &'static str,
    pub failure_streak: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_warning_at: Option<DateTime<Utc>>,
}

struct Cached<T> {
    value: T,
    at: DateTime<Utc>,
}

/// Signed REST client plus process-wide caches for the venue's futures API.
pub struct Gateway {
    config: BinanceConfig,
    market_data: MarketDataConfig,
    http: reqwest::Client,

    /// Best-effort read-through of the Price Stream's WS cache, consulted
    /// before falling back to REST in `get_mark_prices_batch`. `None` when
    /// `websocket_price_enabled` is off or no stream has been wired in.
    price_stream_cache: Option<Arc<PriceCache>>,

    price_cache: DashMap<String, Cached<Decimal>>,
    all_prices_cache: std::sync::Mutex<Option<Cached<Arc<DashMap<String, Decimal>>>>>,
    balance_cache: DashMap<String, Cached<Decimal>>,
    symbol_filters: DashMap<String, SymbolFilters>,

    failure_streak: AtomicU32,
    last_failure_at: std::sync::Mutex<Option<DateTime<Utc>>>,
    last_warning_at: AtomicI64,
}

impl Gateway {
    pub fn new(config: BinanceConfig, market_data: MarketDataConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(market_data.http_timeout_secs))
            .build()
            .expect("gateway http client");

        Self {
            config,
            market_data,
            http,
            price_stream_cache: None,
            price_cache: DashMap::new(),
            all_prices_cache: std::sync::Mutex::new(None),
            balance_cache: DashMap::new(),
            symbol_filters: DashMap::new(),
            failure_streak: AtomicU32::new(0),
            last_failure_at: std::sync::Mutex::new(None),
            last_warning_at: AtomicI64::new(0),
        }
    }

    /// Wire in the Price Stream's shared cache so batched mark-price lookups
    /// can prefer live WS data over REST (§4.A supplement).
    pub fn with_price_stream_cache(mut self, cache: Arc<PriceCache>) -> Self {
        self.price_stream_cache = Some(cache);
        self
    }

    pub fn health(&self) -> GatewayHealth {
        let streak = self.failure_streak.load(Ordering::Relaxed);
        let status = if streak >= self.market_data.rest_fail_threshold {
            "degraded"
        } else {
            "ok"
        };
        let last_warning = self.last_warning_at.load(Ordering::Relaxed);
        GatewayHealth {
            status,
            failure_streak: streak,
            last_failure_at: *self.last_failure_at.lock().unwrap(),
            last_warning_at: if last_warning == 0 {
                None
            } else {
                Utc.timestamp_millis_opt(last_warning).single()
            },
        }
    }

    // -- balance -------------------------------------------------------

    pub async fn get_futures_available_balance(&self, asset: &str) -> Result<Decimal> {
        let ttl = self.market_data.balance_cache_ttl_secs;
        if let Some(entry) = self.balance_cache.get(asset) {
            if (Utc::now() - entry.at).num_seconds() < ttl {
                return Ok(entry.value);
            }
        }

        #[derive(Deserialize)]
        struct BalanceEntry {
            asset: String,
            #[serde(rename = "availableBalance")]
            available_balance: Decimal,
        }

        let entries: Vec<BalanceEntry> = self
            .signed_get("/fapi/v2/balance", &[])
            .await?;
        let balance = entries
            .into_iter()
            .find(|e| e.asset == asset)
            .map(|e| e.available_balance)
            .unwrap_or(Decimal::ZERO);

        self.balance_cache.insert(
            asset.to_string(),
            Cached {
                value: balance,
                at: Utc::now(),
            },
        );
        Ok(balance)
    }

    /// Explicit invalidation, used by the Execution Engine before every
    /// entry so sizing never reads stale margin (§4.A).
    pub fn clear_balance_cache(&self, asset: Option<&str>) {
        match asset {
            Some(a) => {
                self.balance_cache.remove(a);
            }
            None => self.balance_cache.clear(),
        }
    }

    // -- mark price ------------------------------------------------------

    pub async fn get_mark_price(&self, symbol: &str) -> Result<Decimal> {
        let ttl = self.market_data.price_cache_ttl_secs;
        if let Some(entry) = self.price_cache.get(symbol) {
            if (Utc::now() - entry.at).num_seconds() < ttl {
                return Ok(entry.value);
            }
        }

        #[derive(Deserialize)]
        struct PremiumIndex {
            #[serde(rename = "markPrice")]
            mark_price: Decimal,
        }

        let resp: PremiumIndex = self
            .public_get("/fapi/v1/premiumIndex", &[("symbol", symbol)])
            .await?;

        self.price_cache.insert(
            symbol.to_string(),
            Cached {
                value: resp.mark_price,
                at: Utc::now(),
            },
        );
        Ok(resp.mark_price)
    }

    /// Best-effort WS-first, HTTP-cache-second, single-REST-call-last
    /// fallback chain, capped at `max_single_fetch` individual REST calls
    /// per batch so worst-case latency stays bounded.
    pub async fn get_mark_prices_batch(&self, symbols: &[String]) -> Result<Vec<(String, Decimal)>> {
        let mut out = Vec::with_capacity(symbols.len());
        let mut misses = Vec::new();

        for symbol in symbols {
            if let Some(cache) = &self.price_stream_cache {
                if let Some(price) = cache.get(symbol) {
                    out.push((symbol.clone(), price));
                    continue;
                }
            }
            if let Some(entry) = self.price_cache.get(symbol) {
                if (Utc::now() - entry.at).num_seconds() < self.market_data.price_cache_ttl_secs {
                    out.push((symbol.clone(), entry.value));
                    continue;
                }
            }
            misses.push(symbol.clone());
        }

        if misses.is_empty() {
            return Ok(out);
        }

        // One batched REST call covers the whole miss set in a single
        // request to /fapi/v1/premiumIndex (no `symbol` query param).
        if let Ok(all) = self.get_all_mark_prices().await {
            let mut still_missing = Vec::new();
            for symbol in &misses {
                match all.get(symbol) {
                    Some(price) => out.push((symbol.clone(), *price)),
                    None => still_missing.push(symbol.clone()),
                }
            }
            misses = still_missing;
        }

        // Bounded individual REST fallback for whatever the batch call
        // still didn't resolve (stale exchange list, etc.).
        for symbol in misses.into_iter().take(self.market_data.max_single_fetch) {
            if let Ok(price) = self.get_mark_price(&symbol).await {
                out.push((symbol, price));
            }
        }

        Ok(out)
    }

    pub async fn get_all_mark_prices(&self) -> Result<Arc<DashMap<String, Decimal>>> {
        let ttl = self.market_data.price_cache_ttl_secs;
        {
            let guard = self.all_prices_cache.lock().unwrap();
            if let Some(cached) = guard.as_ref() {
                if (Utc::now() - cached.at).num_seconds() < ttl {
                    return Ok(cached.value.clone());
                }
            }
        }

        #[derive(Deserialize)]
        struct PremiumIndex {
            symbol: String,
            #[serde(rename = "markPrice")]
            mark_price: Decimal,
        }

        let entries: Vec<PremiumIndex> = self.public_get("/fapi/v1/premiumIndex", &[]).await?;
        let map = Arc::new(DashMap::new());
        for entry in entries {
            map.insert(entry.symbol, entry.mark_price);
        }

        *self.all_prices_cache.lock().unwrap() = Some(Cached {
            value: map.clone(),
            at: Utc::now(),
        });
        Ok(map)
    }

    // -- klines ------------------------------------------------------------

    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Kline>> {
        let mut params: Vec<(String, String)> = vec![
            ("symbol".into(), symbol.to_string()),
            ("interval".into(), interval.to_string()),
            ("limit".into(), limit.to_string()),
        ];
        if let Some(s) = start {
            params.push(("startTime".into(), s.timestamp_millis().to_string()));
        }
        if let Some(e) = end {
            params.push(("endTime".into(), e.timestamp_millis().to_string()));
        }
        let params: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let raw: Vec<serde_json::Value> = self.public_get("/fapi/v1/klines", &params).await?;
        raw.into_iter()
            .map(|row| {
                let arr = row.as_array().ok_or_else(|| {
                    Error::DataInvariant("malformed kline row".to_string())
                })?;
                let open_time_ms = arr
                    .first()
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| Error::DataInvariant("kline missing openTime".to_string()))?;
                let parse_decimal = |idx: usize| -> Result<Decimal> {
                    arr.get(idx)
                        .and_then(|v| v.as_str())
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| Error::DataInvariant("kline field not a decimal string".to_string()))
                };
                Ok(Kline {
                    open_time: Utc
                        .timestamp_millis_opt(open_time_ms)
                        .single()
                        .unwrap_or_else(Utc::now),
                    high: parse_decimal(2)?,
                    low: parse_decimal(3)?,
                })
            })
            .collect()
    }

    // -- symbol filters ------------------------------------------------------

    pub async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        if let Some(f) = self.symbol_filters.get(symbol) {
            return Ok(*f);
        }

        #[derive(Deserialize)]
        struct ExchangeInfo {
            symbols: Vec<SymbolInfo>,
        }
        #[derive(Deserialize)]
        struct SymbolInfo {
            symbol: String,
            filters: Vec<serde_json::Value>,
        }

        let info: ExchangeInfo = self.public_get("/fapi/v1/exchangeInfo", &[]).await?;
        let entry = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| Error::DataInvariant(format!("unknown symbol {symbol}")))?;

        let mut step_size = Decimal::new(1, 3);
        let mut tick_size = Decimal::new(1, 2);
        for filter in &entry.filters {
            match filter.get("filterType").and_then(|v| v.as_str()) {
                Some("LOT_SIZE") => {
                    if let Some(s) = filter.get("stepSize").and_then(|v| v.as_str()) {
                        step_size = s.parse().unwrap_or(step_size);
                    }
                }
                Some("PRICE_FILTER") => {
                    if let Some(s) = filter.get("tickSize").and_then(|v| v.as_str()) {
                        tick_size = s.parse().unwrap_or(tick_size);
                    }
                }
                _ => {}
            }
        }

        let filters = SymbolFilters { step_size, tick_size };
        self.symbol_filters.insert(symbol.to_string(), filters);
        Ok(filters)
    }

    pub fn quantize_quantity(&self, qty: Decimal, filters: SymbolFilters) -> Decimal {
        floor_to_quantum(qty, filters.step_size)
    }

    pub fn quantize_price(&self, price: Decimal, filters: SymbolFilters) -> Decimal {
        floor_to_quantum(price, filters.tick_size)
    }

    // -- account settings ------------------------------------------------------

    /// Queried once per order placement rather than cached, since position
    /// mode can change account-wide at any time (§4.A supplement).
    pub async fn get_position_mode(&self) -> Result<PositionMode> {
        #[derive(Deserialize)]
        struct DualSide {
            #[serde(rename = "dualSidePosition")]
            dual_side_position: bool,
        }
        let resp: DualSide = self.signed_get("/fapi/v1/positionSide/dual", &[]).await?;
        Ok(if resp.dual_side_position {
            PositionMode::Hedge
        } else {
            PositionMode::OneWay
        })
    }

    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let leverage_str = leverage.to_string();
        let params = [("symbol", symbol), ("leverage", leverage_str.as_str())];
        let _: serde_json::Value = self.signed_post("/fapi/v1/leverage", &params).await?;
        Ok(())
    }

    // -- orders ------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
        reduce_only: Option<bool>,
        position_side: Option<PositionSide>,
    ) -> Result<OrderResult> {
        let qty_str = qty.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("symbol", symbol),
            ("side", side_str(side)),
            ("type", "MARKET"),
            ("quantity", &qty_str),
        ];
        if let Some(ro) = reduce_only {
            params.push(("reduceOnly", if ro { "true" } else { "false" }));
        }
        let ps_str = position_side.map(position_side_str);
        if let Some(ps) = ps_str {
            params.push(("positionSide", ps));
        }
        self.submit_order(&params).await
    }

    pub async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
        price: Decimal,
        time_in_force: &str,
    ) -> Result<OrderResult> {
        let qty_str = qty.to_string();
        let price_str = price.to_string();
        let params = [
            ("symbol", symbol),
            ("side", side_str(side)),
            ("type", "LIMIT"),
            ("quantity", qty_str.as_str()),
            ("price", price_str.as_str()),
            ("timeInForce", time_in_force),
        ];
        self.submit_order(&params).await
    }

    async fn submit_order(&self, params: &[(&str, &str)]) -> Result<OrderResult> {
        #[derive(Deserialize)]
        struct OrderResponse {
            #[serde(rename = "orderId")]
            order_id: i64,
            status: String,
            #[serde(rename = "avgPrice")]
            avg_price: Option<Decimal>,
            price: Option<Decimal>,
            #[serde(rename = "executedQty")]
            executed_qty: Decimal,
            #[serde(rename = "origQty")]
            orig_qty: Decimal,
        }

        let resp: OrderResponse = self.signed_post("/fapi/v1/order", params).await?;
        Ok(OrderResult {
            order_id: resp.order_id.to_string(),
            status: parse_order_status(&resp.status)?,
            avg_price: resp.avg_price,
            price: resp.price,
            executed_qty: resp.executed_qty,
            orig_qty: resp.orig_qty,
        })
    }

    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let params = [("symbol", symbol), ("orderId", order_id)];
        let _: serde_json::Value = self.signed_delete("/fapi/v1/order", &params).await?;
        Ok(())
    }

    pub async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderResult> {
        #[derive(Deserialize)]
        struct OrderResponse {
            #[serde(rename = "orderId")]
            order_id: i64,
            status: String,
            #[serde(rename = "avgPrice")]
            avg_price: Option<Decimal>,
            price: Option<Decimal>,
            #[serde(rename = "executedQty")]
            executed_qty: Decimal,
            #[serde(rename = "origQty")]
            orig_qty: Decimal,
        }

        let params = [("symbol", symbol), ("orderId", order_id)];
        let resp: OrderResponse = self.signed_get("/fapi/v1/order", &params).await?;
        Ok(OrderResult {
            order_id: resp.order_id.to_string(),
            status: parse_order_status(&resp.status)?,
            avg_price: resp.avg_price,
            price: resp.price,
            executed_qty: resp.executed_qty,
            orig_qty: resp.orig_qty,
        })
    }

    /// `None` means *unknown* — a transport failure that exhausted retries.
    /// Callers must never treat `None` as "no positions" (§4.A, §7).
    pub async fn get_open_positions(&self) -> Option<Vec<ExchangePosition>> {
        #[derive(Deserialize)]
        struct PositionRiskEntry {
            symbol: String,
            #[serde(rename = "positionAmt")]
            position_amt: Decimal,
            #[serde(rename = "entryPrice")]
            entry_price: Decimal,
            #[serde(rename = "markPrice")]
            mark_price: Decimal,
            leverage: Decimal,
            #[serde(rename = "updateTime")]
            update_time: i64,
        }

        let entries: Vec<PositionRiskEntry> =
            match self.signed_get("/fapi/v2/positionRisk", &[]).await {
                Ok(e) => e,
                Err(_) => return None,
            };

        Some(
            entries
                .into_iter()
                .filter(|e| !e.position_amt.is_zero())
                .map(|e| ExchangePosition {
                    symbol: e.symbol,
                    side: if e.position_amt.is_sign_negative() {
                        Side::Sell
                    } else {
                        Side::Buy
                    },
                    position_amt: e.position_amt,
                    entry_price: e.entry_price,
                    mark_price: e.mark_price,
                    leverage: e.leverage.round().to_string().parse().unwrap_or(1),
                    update_time: Utc
                        .timestamp_millis_opt(e.update_time)
                        .single()
                        .unwrap_or_else(Utc::now),
                })
                .collect(),
        )
    }

    // -- signed HTTP plumbing ------------------------------------------------------

    async fn public_get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}{}", self.config.base_url, path);
        self.retrying(|| async {
            let resp = self.http.get(&url).query(params).send().await?;
            self.handle_response(resp).await
        })
        .await
    }

    async fn signed_get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        self.signed_request(reqwest::Method::GET, path, params).await
    }

    async fn signed_post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        self.signed_request(reqwest::Method::POST, path, params).await
    }

    async fn signed_delete<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        self.signed_request(reqwest::Method::DELETE, path, params).await
    }

    async fn signed_request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}{}", self.config.base_url, path);
        self.retrying(|| async {
            let timestamp = Utc::now().timestamp_millis();
            let mut query: Vec<(String, String)> =
                params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
            query.push(("recvWindow".to_string(), self.config.recv_window_ms.to_string()));
            query.push(("timestamp".to_string(), timestamp.to_string()));

            let query_string = query
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            let signature = self.sign(&query_string);
            let signed_url = format!("{url}?{query_string}&signature={signature}");

            let resp = self
                .http
                .request(method.clone(), &signed_url)
                .header("X-MBX-APIKEY", &self.config.api_key)
                .send()
                .await?;
            self.handle_response(resp).await
        })
        .await
    }

    /// HMAC-SHA256 over the URL-encoded parameter string, hex-encoded.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.config.api_secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(&self, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.record_failure();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::AuthRejected(body));
        }
        if status.is_client_error() {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            let code = body.get("code").and_then(|v| v.as_i64());
            let message = body
                .get("msg")
                .and_then(|v| v.as_str())
                .unwrap_or("venue rejected request")
                .to_string();
            return Err(Error::VenueBusinessError { code, message });
        }
        if status.is_server_error() {
            self.record_failure();
            return Err(Error::TransientTransport(format!("venue returned {status}")));
        }

        let body = resp.json::<T>().await?;
        self.record_success();
        Ok(body)
    }

    /// Every REST call retries up to `max_retries` with backoff `b * 2^k`.
    async fn retrying<F, Fut, T>(&self, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_err = None;
        for k in 0..=self.market_data.max_retries {
            match attempt().await {
                Ok(v) => return Ok(v),
                Err(Error::AuthRejected(msg)) => return Err(Error::AuthRejected(msg)),
                Err(Error::VenueBusinessError { code, message }) => {
                    return Err(Error::VenueBusinessError { code, message })
                }
                Err(e) => {
                    last_err = Some(e);
                    if k < self.market_data.max_retries {
                        let backoff_ms = self.market_data.retry_backoff_ms * (1u64 << k);
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::TransientTransport("retries exhausted".to_string())))
    }

    fn record_failure(&self) {
        let streak = self.failure_streak.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_failure_at.lock().unwrap() = Some(Utc::now());

        if streak >= self.market_data.rest_fail_threshold {
            let now_ms = Utc::now().timestamp_millis();
            let last_warning = self.last_warning_at.load(Ordering::Relaxed);
            let cooldown_ms = self.market_data.rest_fail_cooldown_secs * 1000;
            if now_ms - last_warning >= cooldown_ms {
                self.last_warning_at.store(now_ms, Ordering::Relaxed);
                warn!(streak, "exchange REST failure streak crossed threshold");
            }
        }
    }

    fn record_success(&self) {
        self.failure_streak.store(0, Ordering::Relaxed);
    }
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

fn position_side_str(ps: PositionSide) -> &'static str {
    match ps {
        PositionSide::Long => "LONG",
        PositionSide::Short => "SHORT",
    }
}

fn parse_order_status(s: &str) -> Result<OrderStatus> {
    match s {
        "NEW" => Ok(OrderStatus::New),
        "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELED" => Ok(OrderStatus::Canceled),
        "REJECTED" => Ok(OrderStatus::Rejected),
        "EXPIRED" => Ok(OrderStatus::Expired),
        other => {
            debug!(status = other, "unrecognized order status from venue");
            Err(Error::DataInvariant(format!("unrecognized order status: {other}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn gateway() -> Gateway {
        let cfg = Config::test_config();
        Gateway::new(cfg.binance, cfg.market_data)
    }

    #[test]
    fn health_ok_below_threshold() {
        let gw = gateway();
        let health = gw.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.failure_streak, 0);
    }

    #[test]
    fn health_degrades_past_threshold() {
        let gw = gateway();
        for _ in 0..gw.market_data.rest_fail_threshold {
            gw.record_failure();
        }
        assert_eq!(gw.health().status, "degraded");
    }

    #[test]
    fn sign_is_deterministic() {
        let gw = gateway();
        let a = gw.sign("symbol=BTCUSDT&timestamp=1");
        let b = gw.sign("symbol=BTCUSDT&timestamp=1");
        assert_eq!(a, b);
        assert_ne!(a, gw.sign("symbol=ETHUSDT&timestamp=1"));
    }

    #[test]
    fn quantizes_quantity_and_price() {
        let gw = gateway();
        let filters = SymbolFilters {
            step_size: Decimal::new(1, 3),
            tick_size: Decimal::new(1, 2),
        };
        assert_eq!(
            gw.quantize_quantity(Decimal::new(25034, 3), filters),
            Decimal::new(25034, 3)
        );
        assert_eq!(
            gw.quantize_price(Decimal::new(10055, 2), filters),
            Decimal::new(10055, 2)
        );
    }
}
