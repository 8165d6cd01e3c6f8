//! Error taxonomy for the futures execution engine.
//!
//! Variants line up with the behavioral kinds the engine must distinguish:
//! transient transport failures retry silently, auth failures never do,
//! and an unknown exchange state must never be treated as "position gone".

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Network error, 5xx, or timeout. Caller may retry with backoff.
    #[error("transient transport error: {0}")]
    TransientTransport(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("configuration error: {0}")]
    Config(String),

    /// 401 / bad signature. Never retried automatically.
    #[error("exchange rejected credentials: {0}")]
    AuthRejected(String),

    /// 4xx with a venue-specific error code.
    #[error("exchange business error (code {code:?}): {message}")]
    VenueBusinessError { code: Option<i64>, message: String },

    /// Terminal non-fill status, or a fill-status poll that never resolved in time.
    #[error("order not filled: {0}")]
    OrderNotFilled(String),

    /// Zero/negative quantity, malformed response, or another invariant breach.
    #[error("data invariant violated: {0}")]
    DataInvariant(String),

    /// `getOpenPositions` returned null, or reconciliation was ambiguous.
    /// Always a no-op for the caller: preserve current state, retry next tick.
    #[error("unknown exchange state: {0}")]
    UnknownExchangeState(String),

    /// Operator-initiated cancellation.
    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

pub type Result<T> = std::result::Result<T, Error>;
