//! Core domain types for the Kraken Futures connectivity core.
//!
//! This crate provides fundamental types used throughout the connector:
//! - `Symbol`: exchange product identifier (e.g. "PF_XBTUSD")
//! - `Price`, `Qty`: precision-safe numeric types
//! - `Order`, `Fill`, `Position`: converged trading state records
//! - `OrderSide`, `OrderType`, `OrderStatus`: trading enums

pub mod decimal;
pub mod error;
pub mod order;
pub mod position;

pub use decimal::{Price, Qty};
pub use error::{CoreError, Result};
pub use order::{
    ClientOrderId, Fill, FillId, Order, OrderId, OrderSide, OrderStatus, OrderType, Symbol,
};
pub use position::{Position, PositionOrigin};
