//! Wire-level order and exchange-account types shared by the gateway and
//! execution engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal_non_fill(self) -> bool {
        matches!(self, OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired)
    }

    pub fn is_filled(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::PartiallyFilled)
    }
}

/// Account-wide position mode. Determines which order flags are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionMode {
    OneWay,
    Hedge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Long,
    Short,
}

/// Per-symbol quantization filters from `/fapi/v1/exchangeInfo`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub step_size: Decimal,
    pub tick_size: Decimal,
}

impl Default for SymbolFilters {
    fn default() -> Self {
        Self {
            step_size: Decimal::new(1, 1),  // 0.1
            tick_size: Decimal::new(1, 2),  // 0.01
        }
    }
}

/// Floor `value` to the nearest multiple of `quantum` using
/// divide-floor-multiply on arbitrary-precision decimals.
pub fn floor_to_quantum(value: Decimal, quantum: Decimal) -> Decimal {
    if quantum <= Decimal::ZERO {
        return value;
    }
    (value / quantum).floor() * quantum
}

/// Result of submitting or polling an order on the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub status: OrderStatus,
    pub avg_price: Option<Decimal>,
    pub price: Option<Decimal>,
    pub executed_qty: Decimal,
    pub orig_qty: Decimal,
}

impl OrderResult {
    /// Effective fill price, preferring `avg_price` (set once a MARKET order
    /// fills) and falling back to the submitted `price` for LIMIT orders.
    pub fn effective_price(&self) -> Option<Decimal> {
        self.avg_price.filter(|p| *p > Decimal::ZERO).or(self.price)
    }

    /// Effective filled quantity. Falls back to `orig_qty` when
    /// `executed_qty` is zero — the original system's documented
    /// double-count risk (see DESIGN.md): a later fill on the same order id
    /// could be double-counted if this fallback fires after a real partial
    /// fill of zero. Carried forward deliberately, not patched.
    pub fn effective_qty(&self) -> Decimal {
        if self.executed_qty > Decimal::ZERO {
            self.executed_qty
        } else {
            self.orig_qty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floors_to_step_size() {
        let qty = Decimal::new(25034, 3); // 25.034
        let stepped = floor_to_quantum(qty, Decimal::new(1, 2)); // 0.01
        assert_eq!(stepped, Decimal::new(2503, 2)); // 25.03
    }

    #[test]
    fn floor_is_idempotent_on_exact_multiples() {
        let qty = Decimal::new(25, 0);
        assert_eq!(floor_to_quantum(qty, Decimal::new(1, 3)), qty);
    }
}
