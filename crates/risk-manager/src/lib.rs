//! Risk Manager
//!
//! Position monitoring and exchange reconciliation (component F): evaluates
//! stop-loss/trailing-stop exits on every active position and reconciles
//! local state against the exchange's position snapshot.

pub mod reconciler;

pub use reconciler::Reconciler;
