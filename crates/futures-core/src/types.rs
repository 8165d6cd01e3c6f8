//! Core domain types for the futures execution engine.

pub mod execution_log;
pub mod manual_plan;
pub mod order;
pub mod position;

pub use execution_log::*;
pub use manual_plan::*;
pub use order::*;
pub use position::*;
