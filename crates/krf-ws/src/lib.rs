//! WebSocket connectivity for Kraken Futures feeds.
//!
//! Provides:
//! - Connection lifecycle with automatic reconnection and bounded
//!   exponential backoff
//! - Challenge-response authentication for private feeds
//! - Subscription tracking with per-feed failure isolation
//! - Idle-aware heartbeat monitoring
//! - Frame demux onto bounded channels with per-(feed, product)
//!   sequence checks

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod sequence;
pub mod subscription;

pub use connection::{
    ConnectionConfig, ConnectionManager, FeedChannels, FeedFrame, SessionState,
};
pub use error::{WsError, WsResult};
pub use message::{
    is_private_feed, parse_frame, BookDelta, BookLevel, BookSide, BookSnapshot,
    ChallengeRequest, FillsEvent, OpenOrdersEvent, OpenOrdersSnapshot, OpenPositionsEvent,
    Route, SubscribeRequest, TradeEvent, WsFill, WsMessage, WsOrder, WsPosition,
};
pub use sequence::{SeqCheck, SeqTracker};
pub use subscription::{Subscription, SubscriptionManager, SubscriptionState};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
