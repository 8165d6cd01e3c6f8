//! Application state shared across handlers.

use sqlx::PgPool;
use std::sync::Arc;

use auth::ApiKeyAuth;
use futures_core::api::gateway::Gateway;
use futures_core::config::Config;
use futures_core::db::execution_logs::ExecutionLogRepository;
use futures_core::db::plans::PlanRepository;
use futures_core::db::positions::PositionRepository;
use trading_engine::ExecutionEngine;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: PgPool,
    /// Engine-wide configuration (trading, scheduling, market-data knobs).
    pub config: Arc<Config>,
    /// Exchange gateway, shared with the scheduler/reconciler running in-process.
    pub gateway: Arc<Gateway>,
    /// Execution engine, used by the cancel endpoint's best-effort exchange cleanup.
    pub engine: Arc<ExecutionEngine>,
    pub plans: Arc<PlanRepository>,
    pub positions: Arc<PositionRepository>,
    pub logs: Arc<ExecutionLogRepository>,
    /// Operator API-key authenticator.
    pub api_keys: Arc<ApiKeyAuth>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: Arc<Config>,
        gateway: Arc<Gateway>,
        engine: Arc<ExecutionEngine>,
        api_keys: Arc<ApiKeyAuth>,
    ) -> Self {
        let plans = Arc::new(PlanRepository::new(pool.clone()));
        let positions = Arc::new(PositionRepository::new(pool.clone()));
        let logs = Arc::new(ExecutionLogRepository::new(pool.clone()));

        Self {
            pool,
            config,
            gateway,
            engine,
            plans,
            positions,
            logs,
            api_keys,
        }
    }
}
