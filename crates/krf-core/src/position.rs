//! Position records.
//!
//! A position exists while its signed balance is nonzero. Positions
//! opened through the assignment program arrive already filled and are
//! tagged with `PositionOrigin::Assigned`; they share every subsequent
//! management path with normally opened positions.

use crate::decimal::Price;
use crate::order::Symbol;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How the position came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionOrigin {
    /// Opened by a client order filling.
    Opened,
    /// Assigned by the exchange, already open on arrival.
    Assigned,
}

/// An open position in a market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    /// Signed balance: positive = long, negative = short.
    pub balance: Decimal,
    pub entry_price: Price,
    /// Latest mark price, when the feed has delivered one.
    pub mark_price: Option<Price>,
    pub liquidation_threshold: Option<Price>,
    pub origin: PositionOrigin,
    pub last_update: DateTime<Utc>,
}

impl Position {
    pub fn new(
        symbol: Symbol,
        balance: Decimal,
        entry_price: Price,
        origin: PositionOrigin,
    ) -> Self {
        Self {
            symbol,
            balance,
            entry_price,
            mark_price: None,
            liquidation_threshold: None,
            origin,
            last_update: Utc::now(),
        }
    }

    /// A position with zero balance is closed and dropped from tracking.
    pub fn is_flat(&self) -> bool {
        self.balance.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.balance.is_sign_positive() && !self.balance.is_zero()
    }

    pub fn is_short(&self) -> bool {
        self.balance.is_sign_negative()
    }
}
