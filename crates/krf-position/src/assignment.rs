//! Assignment entry for positions.
//!
//! Most positions come from our own orders; some are assigned by the
//! exchange (e.g. liquidation takeover) and start life already filled.
//! Rather than a special order subtype, the difference is an initial
//! state injected into the tracker: `PreFilledAssignment` synthesizes
//! an already-`Filled` order record and a position with `Assigned`
//! origin, skipping Submitted/Placed entirely. From then on the
//! position is managed and closed through exactly the same tracker
//! paths as a normally opened one.

use crate::error::TrackerResult;
use crate::tracker::TrackerHandle;
use chrono::{DateTime, Utc};
use krf_core::{
    ClientOrderId, Order, OrderId, OrderSide, OrderStatus, OrderType, Position, PositionOrigin,
    Price, Qty, Symbol,
};

/// An exchange-assigned position delivery.
#[derive(Debug, Clone)]
pub struct Assignment {
    /// Exchange identifier for the assignment event.
    pub assignment_id: String,
    pub symbol: Symbol,
    /// Side of the synthetic opening order.
    pub side: OrderSide,
    pub quantity: Qty,
    /// Price at which the position was assigned.
    pub price: Price,
    pub timestamp: DateTime<Utc>,
}

/// How an order record enters the tracker.
#[derive(Debug, Clone)]
pub enum InitialState {
    /// Normal path: Submitted, nothing filled.
    NormalOpen(Order),
    /// Assignment path: already filled at the assignment price.
    PreFilledAssignment(Assignment),
}

impl Assignment {
    /// Deterministic client id so a replayed assignment event is
    /// idempotent in the tracker.
    pub fn client_order_id(&self) -> ClientOrderId {
        ClientOrderId::from_string(format!("assignment_{}", self.assignment_id))
    }

    /// Synthetic order record: terminal from birth.
    pub fn to_order(&self) -> Order {
        Order {
            order_id: Some(OrderId::new(self.assignment_id.clone())),
            client_order_id: self.client_order_id(),
            symbol: self.symbol.clone(),
            side: self.side,
            order_type: OrderType::Limit {
                limit_price: self.price,
            },
            quantity: self.quantity,
            filled: self.quantity,
            status: OrderStatus::Filled,
            last_update: self.timestamp,
        }
    }

    /// The assigned position.
    pub fn to_position(&self) -> Position {
        let signed = self.quantity.inner() * rust_decimal::Decimal::from(self.side.sign());
        Position {
            symbol: self.symbol.clone(),
            balance: signed,
            entry_price: self.price,
            mark_price: None,
            liquidation_threshold: None,
            origin: PositionOrigin::Assigned,
            last_update: self.timestamp,
        }
    }
}

/// Feeds assignment events into a tracker.
#[derive(Clone)]
pub struct PositionAssignmentAdapter {
    tracker: TrackerHandle,
}

impl PositionAssignmentAdapter {
    pub fn new(tracker: TrackerHandle) -> Self {
        Self { tracker }
    }

    /// Enter an order record into the tracker in its initial state.
    pub async fn enter(&self, initial: InitialState) -> TrackerResult<()> {
        match initial {
            InitialState::NormalOpen(order) => self.tracker.track(order).await,
            InitialState::PreFilledAssignment(assignment) => self.assign(assignment).await,
        }
    }

    /// Seed the tracker with an assigned position and its synthetic
    /// filled order.
    pub async fn assign(&self, assignment: Assignment) -> TrackerResult<()> {
        self.tracker
            .seed(assignment.to_order(), assignment.to_position())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn assignment() -> Assignment {
        Assignment {
            assignment_id: "assign-42".to_string(),
            symbol: Symbol::new("PF_XBTUSD"),
            side: OrderSide::Buy,
            quantity: Qty::new(dec!(250)),
            price: Price::new(dec!(31000)),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_synthetic_order_is_terminal_and_filled() {
        let order = assignment().to_order();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled, order.quantity);
        assert!(order.is_terminal());
        assert_eq!(order.client_order_id.as_str(), "assignment_assign-42");
    }

    #[test]
    fn test_assigned_position_origin() {
        let position = assignment().to_position();
        assert_eq!(position.origin, PositionOrigin::Assigned);
        assert_eq!(position.balance, dec!(250));
        assert!(position.is_long());
    }

    #[test]
    fn test_short_assignment_balance_negative() {
        let mut a = assignment();
        a.side = OrderSide::Sell;
        assert_eq!(a.to_position().balance, dec!(-250));
    }
}
