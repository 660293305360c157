//! Order-related types and identifiers.
//!
//! Provides the shared order record, the closed set of Kraken Futures
//! order types with their type-specific payloads, and fill records.

use crate::decimal::{Price, Qty};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Exchange product identifier (e.g. "PF_XBTUSD").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Exchange-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Client order ID for idempotency.
///
/// Every submitted order carries a unique cloid so retries and the
/// REST-ack/WS-event race converge on the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Create a new unique client order ID.
    ///
    /// Format: `krf_{timestamp_ms}_{uuid_short}`
    pub fn new() -> Self {
        let ts = Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().to_string()[..8];
        Self(format!("krf_{ts}_{uuid_short}"))
    }

    /// Create from an existing string (for parsing responses).
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientOrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Execution (fill) identifier, the dedup key for execution events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FillId(String);

impl FillId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns 1 for buy, -1 for sell (for position balance updates).
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order type with its type-specific payload.
///
/// Closed set of the order types Kraken Futures accepts; each variant
/// carries only the parameters that type needs, so validation and wire
/// encoding dispatch by `match` instead of per-type override chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderType {
    /// Resting limit order.
    Limit { limit_price: Price },
    /// Immediate-or-cancel with exchange price protection.
    Market,
    /// Stop order, optionally with a limit cap once triggered.
    Stop {
        stop_price: Price,
        limit_price: Option<Price>,
    },
    /// Take-profit order triggered at the given price.
    TakeProfit { trigger_price: Price },
    /// Trailing stop with a maximum deviation in percent.
    TrailingStop { max_deviation: Decimal },
}

impl OrderType {
    /// Wire code used by the REST `orderType` parameter.
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::Limit { .. } => "lmt",
            Self::Market => "mkt",
            Self::Stop { .. } => "stp",
            Self::TakeProfit { .. } => "take_profit",
            Self::TrailingStop { .. } => "trailing_stop",
        }
    }

    /// The limit price, for the variants that carry one.
    pub fn limit_price(&self) -> Option<Price> {
        match self {
            Self::Limit { limit_price } => Some(*limit_price),
            Self::Stop { limit_price, .. } => *limit_price,
            _ => None,
        }
    }

    /// Replace the limit price (edit acks). No-op for types without one.
    pub fn set_limit_price(&mut self, price: Price) {
        match self {
            Self::Limit { limit_price } => *limit_price = price,
            Self::Stop { limit_price, .. } => *limit_price = Some(price),
            _ => {}
        }
    }
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Sent, no acknowledgement yet.
    Submitted,
    /// Acknowledged and resting (or working) on the exchange.
    Placed,
    /// Rejected by the exchange.
    Rejected,
    /// Partially executed.
    PartiallyFilled,
    /// Fully executed.
    Filled,
    /// Cancelled before full execution.
    Cancelled,
    /// Expired before full execution.
    Expired,
}

impl OrderStatus {
    /// Terminal states are never overwritten by later events.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Filled | Self::Cancelled | Self::Expired
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitted => "submitted",
            Self::Placed => "placed",
            Self::Rejected => "rejected",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// Converged order record.
///
/// Invariant: `filled <= quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Exchange order id, if already assigned.
    pub order_id: Option<OrderId>,
    /// Client order id (idempotency key).
    pub client_order_id: ClientOrderId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Qty,
    pub filled: Qty,
    pub status: OrderStatus,
    pub last_update: DateTime<Utc>,
}

impl Order {
    /// Create a freshly submitted order record.
    pub fn new(
        client_order_id: ClientOrderId,
        symbol: Symbol,
        side: OrderSide,
        order_type: OrderType,
        quantity: Qty,
    ) -> Self {
        Self {
            order_id: None,
            client_order_id,
            symbol,
            side,
            order_type,
            quantity,
            filled: Qty::ZERO,
            status: OrderStatus::Submitted,
            last_update: Utc::now(),
        }
    }

    /// Remaining quantity still open.
    pub fn remaining(&self) -> Qty {
        self.quantity - self.filled
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_fully_filled(&self) -> bool {
        self.filled >= self.quantity
    }
}

/// Execution record, deduplicated by `fill_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: FillId,
    pub order_id: OrderId,
    pub price: Price,
    pub qty: Qty,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn test_client_order_id_unique() {
        let id1 = ClientOrderId::new();
        let id2 = ClientOrderId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_client_order_id_format() {
        let id = ClientOrderId::new();
        assert!(id.as_str().starts_with("krf_"));
    }

    #[test]
    fn test_order_type_wire_codes() {
        let lmt = OrderType::Limit {
            limit_price: Price::new(dec!(9400)),
        };
        assert_eq!(lmt.wire_code(), "lmt");
        assert_eq!(OrderType::Market.wire_code(), "mkt");
        assert_eq!(
            OrderType::TrailingStop {
                max_deviation: dec!(1)
            }
            .wire_code(),
            "trailing_stop"
        );
    }

    #[test]
    fn test_set_limit_price_dispatch() {
        let mut lmt = OrderType::Limit {
            limit_price: Price::new(dec!(100)),
        };
        lmt.set_limit_price(Price::new(dec!(101)));
        assert_eq!(lmt.limit_price(), Some(Price::new(dec!(101))));

        let mut mkt = OrderType::Market;
        mkt.set_limit_price(Price::new(dec!(101)));
        assert_eq!(mkt.limit_price(), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(!OrderStatus::Placed.is_terminal());
    }

    #[test]
    fn test_order_remaining() {
        let mut order = Order::new(
            ClientOrderId::new(),
            Symbol::new("PF_XBTUSD"),
            OrderSide::Buy,
            OrderType::Market,
            Qty::new(dec!(1000)),
        );
        order.filled = Qty::new(dec!(400));
        assert_eq!(order.remaining(), Qty::new(dec!(600)));
        assert!(!order.is_fully_filled());
    }
}
