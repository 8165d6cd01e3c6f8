//! Futures Listing Engine
//!
//! This is the root crate that provides benchmark access to the internal modules.
//! For actual functionality, use the individual crates directly:
//!
//! - `futures-core`: shared types, the exchange gateway, the price stream, database models
//! - `trading-engine`: the execution engine and scheduler
//! - `risk-manager`: the position monitor and reconciler
//! - `auth`: operator API-key authentication
//! - `api-server`: the operator-facing REST API

// Re-export for benchmarks
pub use futures_core as core;
pub use risk_manager as risk;
pub use trading_engine as trading;
