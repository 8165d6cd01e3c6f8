//! Auth
//!
//! API-key authentication for the operator-facing REST API. The engine has
//! a single trading desk as its audience, so this crate intentionally stops
//! at "is this request carrying a key we issued" — no per-user roles, no
//! session/JWT machinery, no audit log of who-did-what.

pub mod api_key;

pub use api_key::{ApiKey, ApiKeyAuth};
