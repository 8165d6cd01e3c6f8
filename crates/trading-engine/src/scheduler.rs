//! Scheduler — three periodic tasks plus one-shot precision threads
//! (component E, §4.E). A single `tokio::select!` loop fires the ticks;
//! each tick dispatches its body to a bounded worker pool (a `Semaphore`-
//! gated `tokio::spawn`, never an OS-thread pool — there is no GIL to
//! escape and the I/O here is already async, per §5's Rust realization).

use crate::executor::ExecutionEngine;
use dashmap::DashMap;
use futures_core::api::price_stream::PriceStream;
use futures_core::config::SchedulingConfig;
use futures_core::db::plans::PlanRepository;
use futures_core::types::manual_plan::ManualPlan;
use futures_core::Result;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Implemented by the Position Monitor & Reconciler (component F, in the
/// risk-manager crate). The Scheduler only knows the shape of a tick, not
/// that crate's types — dependency inversion keeps trading-engine from
/// depending on risk-manager, which itself depends on trading-engine for
/// close-order submission (§4.F step 4).
#[async_trait::async_trait]
pub trait PositionMonitor: Send + Sync {
    /// Runs one exit-evaluation pass, fanning per-position checks out to
    /// `worker_permits` so the caller's own concurrency policy (sized off
    /// CPU count) bounds how many positions are evaluated at once. Returns
    /// the number of ACTIVE positions observed, which the Scheduler uses
    /// to pick the next monitor-tick interval (§4.E adaptive cadence).
    async fn run_monitor_tick(&self, worker_permits: Arc<Semaphore>) -> Result<usize>;

    /// Runs the reconciliation pass (duplicate collapse, external
    /// discovery/closure, downtime extrema recovery), bounded the same way.
    async fn run_sync_tick(&self, worker_permits: Arc<Semaphore>) -> Result<()>;
}

/// Tracks whether a periodic task is currently running plus when it
/// started, to implement the soft/hard-deadline non-reentrancy rule.
struct TickGuard {
    running: AtomicBool,
    start_ms: AtomicI64,
    soft_timeout: Duration,
    hard_timeout: Duration,
}

impl TickGuard {
    fn new(soft_timeout: Duration, hard_timeout: Duration) -> Self {
        Self {
            running: AtomicBool::new(false),
            start_ms: AtomicI64::new(0),
            soft_timeout,
            hard_timeout,
        }
    }

    /// Returns `true` if the caller may proceed. On re-entry: force-reset
    /// and proceed past the hard deadline, warn-and-skip past the soft
    /// deadline, else skip silently.
    fn try_enter(&self, tick_name: &str) -> bool {
        if !self.running.swap(true, Ordering::AcqRel) {
            self.start_ms
                .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);
            return true;
        }

        let started = self.start_ms.load(Ordering::Acquire);
        let elapsed = Duration::from_millis((chrono::Utc::now().timestamp_millis() - started).max(0) as u64);

        if elapsed > self.hard_timeout {
            warn!(tick = tick_name, ?elapsed, "tick exceeded hard deadline, forcing reset");
            self.start_ms
                .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);
            true
        } else if elapsed > self.soft_timeout {
            warn!(tick = tick_name, ?elapsed, "tick still running past soft deadline, skipping");
            false
        } else {
            debug!(tick = tick_name, "tick already running, skipping");
            false
        }
    }

    fn exit(&self) {
        self.running.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    config: SchedulingConfig,
    plans: PlanRepository,
    engine: Arc<ExecutionEngine>,
    price_stream: Arc<PriceStream>,
    monitor: Arc<dyn PositionMonitor>,

    plan_guard: TickGuard,
    monitor_guard: TickGuard,
    sync_guard: TickGuard,

    monitor_pool: Arc<Semaphore>,
    sync_pool: Arc<Semaphore>,

    /// One precision thread per armed plan id, removed on exit.
    precision_threads: Arc<DashMap<Uuid, ()>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulingConfig,
        plans: PlanRepository,
        engine: Arc<ExecutionEngine>,
        price_stream: Arc<PriceStream>,
        monitor: Arc<dyn PositionMonitor>,
    ) -> Self {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

        Self {
            config,
            plans,
            engine,
            price_stream,
            monitor,
            plan_guard: TickGuard::new(Duration::from_millis(1_500), Duration::from_millis(1_500)),
            monitor_guard: TickGuard::new(Duration::from_millis(700), Duration::from_secs(3)),
            sync_guard: TickGuard::new(Duration::from_secs(3), Duration::from_secs(12)),
            monitor_pool: Arc::new(Semaphore::new(cpus.max(4))),
            sync_pool: Arc::new(Semaphore::new((cpus / 2).max(2))),
            precision_threads: Arc::new(DashMap::new()),
        }
    }

    /// Runs forever. Intended to be spawned as a single background task by
    /// the binary's composition root.
    ///
    /// Every tick is spawned onto the bounded worker pool and the `select!`
    /// returns immediately (§5) — including the monitor tick, whose active-
    /// position count feeds back through `monitor_result` rather than being
    /// awaited inline, so a slow monitor pass can never stall plan-tick or
    /// sync-tick (§4.E).
    pub async fn run(self: Arc<Self>) {
        let mut plan_interval = tokio::time::interval(Duration::from_millis(self.config.manual_plan_check_interval_ms));
        let mut monitor_interval = tokio::time::interval(Duration::from_millis(self.config.monitor_interval_idle_ms));
        let mut sync_interval = tokio::time::interval(Duration::from_secs(self.config.sync_interval_secs));
        let (monitor_result_tx, mut monitor_result_rx) = mpsc::channel::<usize>(4);

        loop {
            tokio::select! {
                _ = plan_interval.tick() => {
                    let this = self.clone();
                    tokio::spawn(async move { this.plan_tick().await });
                }
                _ = monitor_interval.tick() => {
                    let this = self.clone();
                    let tx = monitor_result_tx.clone();
                    tokio::spawn(async move {
                        if let Some(count) = this.monitor_tick().await {
                            let _ = tx.send(count).await;
                        }
                    });
                }
                Some(count) = monitor_result_rx.recv() => {
                    let next = if count > 0 {
                        self.config.monitor_interval_active_ms
                    } else {
                        self.config.monitor_interval_idle_ms
                    };
                    monitor_interval = tokio::time::interval(Duration::from_millis(next));
                }
                _ = sync_interval.tick() => {
                    let this = self.clone();
                    tokio::spawn(async move { this.sync_tick().await });
                }
            }
        }
    }

    async fn plan_tick(&self) {
        if !self.plan_guard.try_enter("plan-tick") {
            return;
        }

        if let Err(e) = self.plan_tick_body().await {
            error!(error = %e, "plan-tick failed");
        }

        self.plan_guard.exit();
    }

    async fn plan_tick_body(&self) -> Result<()> {
        let now = chrono::Utc::now();

        // 1. Fire everything already due.
        for plan in self.plans.list_due(now).await? {
            self.fire(&plan).await;
        }

        // 2. Warm up the price stream ahead of listing time.
        let subscribe_horizon = self.config.websocket_subscribe_before_minutes * 60;
        for plan in self.plans.list_upcoming(now, subscribe_horizon).await? {
            self.price_stream.subscribe(&plan.symbol).await;
        }

        // 3. Arm precision threads within the tighter firing horizon.
        if self.config.manual_plan_precision_mode {
            let threshold = self.config.manual_plan_precision_threshold_secs;
            for plan in self.plans.list_upcoming(now, threshold).await? {
                self.arm_precision_thread(plan);
            }
        }

        Ok(())
    }

    /// Idempotent: a plan id already present in the map is left alone.
    fn arm_precision_thread(&self, plan: ManualPlan) {
        let plan_id = plan.id;
        if self.precision_threads.contains_key(&plan_id) {
            return;
        }
        self.precision_threads.insert(plan_id, ());

        let plans = self.plans.clone();
        let engine = self.engine.clone();
        let threads = self.precision_threads.clone();

        tokio::spawn(async move {
            precision_fire(plan, plans, engine).await;
            threads.remove(&plan_id);
        });
    }

    /// Attempts the atomic claim and, if won, runs the Execution Engine and
    /// records the terminal plan state. Shared by the plan-tick's due-list
    /// pass and the precision thread's fire-at-deadline pass.
    async fn fire(&self, plan: &ManualPlan) {
        match self.plans.try_claim(plan.id).await {
            Ok(true) => {}
            Ok(false) => return, // lost the race, someone else is handling it
            Err(e) => {
                error!(plan_id = %plan.id, error = %e, "failed to claim plan");
                return;
            }
        }

        match self.engine.execute_plan(plan).await {
            Ok(crate::executor::EntryOutcome::Filled(position)) => {
                info!(plan_id = %plan.id, position_id = %position.id, "plan executed");
                if let Err(e) = self.engine.mark_executed(plan.id).await {
                    error!(plan_id = %plan.id, error = %e, "failed to mark plan executed");
                }
            }
            Ok(other) => {
                warn!(plan_id = %plan.id, outcome = ?other, "plan entry did not fill");
                if let Err(e) = self.engine.mark_failed(plan.id).await {
                    error!(plan_id = %plan.id, error = %e, "failed to mark plan failed");
                }
            }
            Err(e) => {
                error!(plan_id = %plan.id, error = %e, "plan execution errored");
                if let Err(e) = self.engine.mark_failed(plan.id).await {
                    error!(plan_id = %plan.id, error = %e, "failed to mark plan failed");
                }
            }
        }
    }

    async fn monitor_tick(&self) -> Option<usize> {
        if !self.monitor_guard.try_enter("monitor-tick") {
            return None;
        }

        let result = self.monitor.run_monitor_tick(self.monitor_pool.clone()).await;
        self.monitor_guard.exit();

        match result {
            Ok(count) => Some(count),
            Err(e) => {
                error!(error = %e, "monitor-tick failed");
                None
            }
        }
    }

    async fn sync_tick(&self) {
        if !self.sync_guard.try_enter("sync-tick") {
            return;
        }

        if let Err(e) = self.monitor.run_sync_tick(self.sync_pool.clone()).await {
            error!(error = %e, "sync-tick failed");
        }

        self.sync_guard.exit();
    }
}

/// Millisecond-accurate entry firing for a single plan (§4.E "Precision
/// thread"). Spin-sleeps down to the listing instant, then races the
/// plan-tick for the claim — whichever wins executes, the loser exits
/// silently.
async fn precision_fire(plan: ManualPlan, plans: PlanRepository, engine: Arc<ExecutionEngine>) {
    let wait = plan.listing_time - chrono::Utc::now();
    if let Ok(wait_std) = wait.to_std() {
        if wait_std > Duration::from_millis(100) {
            tokio::time::sleep(wait_std - Duration::from_millis(50)).await;
        }
    }

    loop {
        let remaining = plan.listing_time - chrono::Utc::now();
        if remaining <= chrono::Duration::zero() {
            break;
        }
        let sleep_for = if remaining > chrono::Duration::milliseconds(10) {
            Duration::from_millis(5)
        } else {
            Duration::from_millis(1)
        };
        tokio::time::sleep(sleep_for).await;
    }

    let fire_start = chrono::Utc::now();

    match plans.try_claim(plan.id).await {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            error!(plan_id = %plan.id, error = %e, "precision thread failed to claim plan");
            return;
        }
    }

    let delay_ms = (chrono::Utc::now() - plan.listing_time).num_milliseconds();
    info!(plan_id = %plan.id, delay_ms, fired_at = %fire_start, "precision thread firing");

    match engine.execute_plan(&plan).await {
        Ok(crate::executor::EntryOutcome::Filled(position)) => {
            info!(plan_id = %plan.id, position_id = %position.id, "precision fire executed");
            if let Err(e) = engine.mark_executed(plan.id).await {
                error!(plan_id = %plan.id, error = %e, "failed to mark plan executed");
            }
        }
        Ok(other) => {
            warn!(plan_id = %plan.id, outcome = ?other, "precision fire did not fill");
            if let Err(e) = engine.mark_failed(plan.id).await {
                error!(plan_id = %plan.id, error = %e, "failed to mark plan failed");
            }
        }
        Err(e) => {
            error!(plan_id = %plan.id, error = %e, "precision fire errored");
            if let Err(e) = engine.mark_failed(plan.id).await {
                error!(plan_id = %plan.id, error = %e, "failed to mark plan failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_guard_allows_first_entry() {
        let guard = TickGuard::new(Duration::from_millis(100), Duration::from_millis(200));
        assert!(guard.try_enter("test"));
    }

    #[test]
    fn tick_guard_blocks_reentry_while_running() {
        let guard = TickGuard::new(Duration::from_secs(10), Duration::from_secs(20));
        assert!(guard.try_enter("test"));
        assert!(!guard.try_enter("test"));
    }

    #[test]
    fn tick_guard_allows_after_exit() {
        let guard = TickGuard::new(Duration::from_millis(100), Duration::from_millis(200));
        assert!(guard.try_enter("test"));
        guard.exit();
        assert!(guard.try_enter("test"));
    }
}
