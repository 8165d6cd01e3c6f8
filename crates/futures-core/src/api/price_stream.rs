//! Real-time mark-price stream over the venue's combined-stream WebSocket
//! (component B, §4.B). Maintains a shared, TTL-checked cache that the
//! Execution Engine and Position Monitor read without ever touching the
//! socket themselves, and a supervisor task that reconnects and resubscribes
//! on drop.

use crate::config::{BinanceConfig, MarketDataConfig};
use crate::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

struct CachedPrice {
    value: Decimal,
    at: DateTime<Utc>,
}

/// Freshness watchdog period and threshold (§4.B): a stream that has gone
/// quiet for longer than this, while symbols are still wanted, is treated as
/// wedged even though the socket itself never errored.
const STALENESS_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const STALENESS_THRESHOLD_SECS: i64 = 10;
const STALE_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Shared mark-price cache. Cloneable (`Arc`-backed) so the Gateway can hold
/// a handle for its WS-first fallback chain without owning the stream.
#[derive(Clone)]
pub struct PriceCache {
    prices: Arc<DashMap<String, CachedPrice>>,
    ttl_secs: i64,
}

impl PriceCache {
    fn new(ttl_secs: i64) -> Self {
        Self {
            prices: Arc::new(DashMap::new()),
            ttl_secs,
        }
    }

    /// `None` on a cache miss or a stale (past-TTL) entry — callers fall back
    /// to REST rather than trust an old price.
    pub fn get(&self, symbol: &str) -> Option<Decimal> {
        let entry = self.prices.get(symbol)?;
        if (Utc::now() - entry.at).num_seconds() < self.ttl_secs {
            Some(entry.value)
        } else {
            None
        }
    }

    fn set(&self, symbol: &str, price: Decimal) {
        self.prices.insert(
            symbol.to_string(),
            CachedPrice {
                value: price,
                at: Utc::now(),
            },
        );
    }

    /// `true` if any wanted symbol has never ticked or its last tick is older
    /// than `max_age_secs` — a connection can stay open while the venue
    /// stops pushing data on it.
    fn any_stale(&self, symbols: &[String], max_age_secs: i64) -> bool {
        symbols.iter().any(|symbol| match self.prices.get(symbol) {
            Some(entry) => (Utc::now() - entry.at).num_seconds() > max_age_secs,
            None => true,
        })
    }
}

/// Subscription control messages sent to the supervisor task.
enum Command {
    Subscribe(String),
    Unsubscribe(String),
}

/// Owns the supervisor task handle and the set of symbols currently wanted.
/// Reconnects are transparent to callers: `subscribe`/`unsubscribe` just
/// update the desired set, and the next (re)connect replays it.
pub struct PriceStream {
    cache: PriceCache,
    wanted: Arc<RwLock<HashSet<String>>>,
    commands: mpsc::Sender<Command>,
}

impl PriceStream {
    pub fn start(config: BinanceConfig, market_data: MarketDataConfig) -> Self {
        let cache = PriceCache::new(market_data.price_cache_ttl_secs);
        let wanted: Arc<RwLock<HashSet<String>>> = Arc::new(RwLock::new(HashSet::new()));
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(supervisor(config, cache.clone(), wanted.clone(), rx));

        Self {
            cache,
            wanted,
            commands: tx,
        }
    }

    pub fn cache(&self) -> PriceCache {
        self.cache.clone()
    }

    /// Idempotent: re-subscribing to an already-wanted symbol is a no-op for
    /// the wire but still refreshes the supervisor's connection set.
    pub async fn subscribe(&self, symbol: &str) {
        let mut set = self.wanted.write().await;
        if set.insert(symbol.to_string()) {
            let _ = self.commands.send(Command::Subscribe(symbol.to_string())).await;
        }
    }

    pub async fn unsubscribe(&self, symbol: &str) {
        let mut set = self.wanted.write().await;
        if set.remove(symbol) {
            let _ = self.commands.send(Command::Unsubscribe(symbol.to_string())).await;
        }
    }

    pub fn get_price(&self, symbol: &str) -> Option<Decimal> {
        self.cache.get(symbol)
    }
}

/// How a connection attempt ended, so the supervisor can pick the right
/// reconnect delay: a clean close resets the exponential backoff, a real
/// error grows it, and a staleness teardown always waits a flat 5s.
enum StreamOutcome {
    Closed,
    Stale,
}

async fn supervisor(
    config: BinanceConfig,
    cache: PriceCache,
    wanted: Arc<RwLock<HashSet<String>>>,
    mut commands: mpsc::Receiver<Command>,
) {
    let mut backoff_secs = 1u64;

    loop {
        let symbols: Vec<String> = wanted.read().await.iter().cloned().collect();

        match connect_and_stream(&config, &symbols, &cache, &mut commands).await {
            Ok(StreamOutcome::Closed) => {
                info!("price stream closed cleanly, reconnecting");
                backoff_secs = 1;
            }
            Ok(StreamOutcome::Stale) => {
                warn!("price stream wedged with no fresh ticks, forcing reconnect");
                tokio::time::sleep(STALE_RECONNECT_BACKOFF).await;
            }
            Err(e) => {
                warn!(error = %e, backoff_secs, "price stream connection failed, retrying");
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                backoff_secs = (backoff_secs * 2).min(30);
            }
        }
    }
}

async fn connect_and_stream(
    config: &BinanceConfig,
    symbols: &[String],
    cache: &PriceCache,
    commands: &mut mpsc::Receiver<Command>,
) -> Result<StreamOutcome> {
    let ws_url = format!("{}/stream", config.ws_base_url);
    let (ws_stream, _) = connect_async(&ws_url).await?;
    let (mut write, mut read) = ws_stream.split();

    for symbol in symbols {
        send_subscribe(&mut write, symbol, true).await?;
    }

    let mut watchdog = tokio::time::interval(STALENESS_CHECK_INTERVAL);
    watchdog.tick().await; // first tick fires immediately; give the connection a grace period

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::Subscribe(symbol)) => {
                        send_subscribe(&mut write, &symbol, true).await?;
                    }
                    Some(Command::Unsubscribe(symbol)) => {
                        send_subscribe(&mut write, &symbol, false).await?;
                    }
                    None => return Ok(StreamOutcome::Closed),
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_message(&text, cache),
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("price stream closed by venue");
                        return Ok(StreamOutcome::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(StreamOutcome::Closed),
                }
            }
            _ = watchdog.tick() => {
                if !symbols.is_empty() && cache.any_stale(symbols, STALENESS_THRESHOLD_SECS) {
                    return Ok(StreamOutcome::Stale);
                }
            }
        }
    }
}

async fn send_subscribe(
    write: &mut futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        Message,
    >,
    symbol: &str,
    subscribe: bool,
) -> Result<()> {
    let stream_name = format!("{}@markPrice@1s", symbol.to_lowercase());
    let method = if subscribe { "SUBSCRIBE" } else { "UNSUBSCRIBE" };
    let msg = serde_json::json!({
        "method": method,
        "params": [stream_name],
        "id": Utc::now().timestamp_millis(),
    });
    write.send(Message::Text(msg.to_string())).await?;
    debug!(symbol, method, "sent stream subscription command");
    Ok(())
}

fn handle_message(text: &str, cache: &PriceCache) {
    #[derive(Deserialize)]
    struct Envelope {
        data: Option<MarkPriceEvent>,
    }
    #[derive(Deserialize)]
    struct MarkPriceEvent {
        s: String,
        p: Decimal,
    }

    let event = match serde_json::from_str::<Envelope>(text) {
        Ok(env) => env.data,
        Err(_) => match serde_json::from_str::<MarkPriceEvent>(text) {
            Ok(ev) => Some(ev),
            Err(_) => {
                debug!(%text, "unrecognized price stream payload");
                None
            }
        },
    };

    if let Some(ev) = event {
        cache.set(&ev.s, ev.p);
    } else {
        error!("price stream message carried no usable mark price");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_miss_when_empty() {
        let cache = PriceCache::new(5);
        assert!(cache.get("BTCUSDT").is_none());
    }

    #[test]
    fn cache_hit_within_ttl() {
        let cache = PriceCache::new(5);
        cache.set("BTCUSDT", Decimal::new(500000, 2));
        assert_eq!(cache.get("BTCUSDT"), Some(Decimal::new(500000, 2)));
    }

    #[test]
    fn cache_miss_past_ttl() {
        let cache = PriceCache::new(0);
        cache.set("BTCUSDT", Decimal::new(500000, 2));
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get("BTCUSDT").is_none());
    }

    #[test]
    fn handles_combined_stream_envelope() {
        let cache = PriceCache::new(5);
        let text = r#"{"stream":"btcusdt@markPrice@1s","data":{"s":"BTCUSDT","p":"50000.10"}}"#;
        handle_message(text, &cache);
        assert_eq!(cache.get("BTCUSDT"), Some(Decimal::new(5000010, 2)));
    }

    #[test]
    fn ignores_malformed_payload() {
        let cache = PriceCache::new(5);
        handle_message("not json", &cache);
        assert!(cache.get("BTCUSDT").is_none());
    }
}
