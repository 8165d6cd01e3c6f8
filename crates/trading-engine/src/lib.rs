//! Trading Engine
//!
//! Order execution and scheduling for the futures listing engine: the
//! Execution Engine (`executor`) submits and confirms entry/exit orders
//! against the exchange gateway, and the Scheduler (`scheduler`) drives
//! plan firing, position monitoring, and reconciliation on their own
//! cadences.

pub mod executor;
pub mod scheduler;

pub use executor::{EntryOutcome, ExecutionEngine, RiskGate};
pub use scheduler::{PositionMonitor, Scheduler};
