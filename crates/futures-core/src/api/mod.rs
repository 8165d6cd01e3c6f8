//! Exchange-facing API clients: the signed REST gateway and the real-time
//! mark-price stream.

pub mod gateway;
pub mod price_stream;

pub use gateway::{ExchangePosition, Gateway, GatewayHealth, Kline};
pub use price_stream::{PriceCache, PriceStream};
