//! Rate-limited, signed REST dispatch for Kraken Futures.
//!
//! Outbound calls flow Signer -> RateLimiter -> transport:
//! - `cost`: static endpoint cost table (derivatives and history pools)
//! - `limiter`: dual-pool rate limiter with cancel-safe reservations
//! - `client`: signed request dispatch returning typed order acks

pub mod client;
pub mod cost;
pub mod error;
pub mod limiter;

pub use client::{
    AckStatus, BatchAck, BatchItem, CancelAllAck, OrderAck, RestClient, RestClientConfig,
    SendOrderParams,
};
pub use cost::Endpoint;
pub use error::{RestError, RestResult};
pub use limiter::{LimiterConfig, Pool, RateLimiter, Reservation, ReservePolicy, WouldExceed};
