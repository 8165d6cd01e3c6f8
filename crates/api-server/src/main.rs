//! API Server binary entrypoint.
//!
//! Composition root: builds the exchange gateway, the price stream, the
//! database-backed repositories, the execution engine, the reconciler, and
//! the scheduler, registers the operator's API key, then spawns the
//! scheduler's tick loop alongside the HTTP server.

use api_server::{ApiServer, AppState, ServerConfig};
use auth::ApiKeyAuth;
use futures_core::api::gateway::Gateway;
use futures_core::api::price_stream::PriceStream;
use futures_core::config::Config;
use futures_core::db::{create_pool, run_migrations};
use risk_manager::Reconciler;
use std::sync::Arc;
use trading_engine::{ExecutionEngine, RiskGate, Scheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "futures_core=info,trading_engine=info,risk_manager=info,api_server=info,sqlx=warn"
                .into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = create_pool(&config.database).await?;

    let skip_migrations = std::env::var("SKIP_MIGRATIONS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    if !skip_migrations {
        tracing::info!("running database migrations");
        run_migrations(&pool).await?;
    }

    let price_stream = Arc::new(PriceStream::start(
        config.binance.clone(),
        config.market_data.clone(),
    ));

    let gateway = Arc::new(
        Gateway::new(config.binance.clone(), config.market_data.clone())
            .with_price_stream_cache(Arc::new(price_stream.cache())),
    );

    let plans = futures_core::db::plans::PlanRepository::new(pool.clone());
    let positions = futures_core::db::positions::PositionRepository::new(pool.clone());
    let logs = futures_core::db::execution_logs::ExecutionLogRepository::new(pool.clone());

    let denylist: Vec<String> = std::env::var("SYMBOL_DENYLIST")
        .ok()
        .map(|s| s.split(',').map(|p| p.trim().to_uppercase()).filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    let risk_gate = RiskGate::new(denylist, config.trading.max_leverage);

    let engine = Arc::new(ExecutionEngine::new(
        gateway.clone(),
        config.trading.clone(),
        plans.clone(),
        positions.clone(),
        logs.clone(),
        risk_gate,
    ));

    let reconciler = Arc::new(Reconciler::new(
        gateway.clone(),
        price_stream.clone(),
        engine.clone(),
        positions.clone(),
        logs.clone(),
        config.trading.clone(),
    ));

    let scheduler = Arc::new(Scheduler::new(
        config.scheduling.clone(),
        plans,
        engine.clone(),
        price_stream,
        reconciler,
    ));
    tokio::spawn(scheduler.run());

    let api_keys = Arc::new(ApiKeyAuth::new());
    if let Ok(operator_key) = std::env::var("OPERATOR_API_KEY") {
        api_keys.register_preshared(&operator_key, "operator").await;
    } else {
        tracing::warn!("OPERATOR_API_KEY not set; no operator key registered at startup");
    }

    let state = Arc::new(AppState::new(
        pool,
        config.clone(),
        gateway,
        engine,
        api_keys,
    ));

    let server_config = ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        ..ServerConfig::from_env()
    };

    let server = ApiServer::new(server_config, state);
    server.run().await
}
