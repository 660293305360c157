//! Wire frames for the Kraken Futures WebSocket (v1).
//!
//! Frames come in two shapes: protocol events keyed by `"event"`
//! (info, challenge, subscribed, error) and feed data keyed by
//! `"feed"` (book, trade, fills, open_orders, ...). `parse_frame`
//! dispatches on those keys and produces a typed message; frames for
//! feeds we do not model come back as `Other` so downstream consumers
//! still see them.

use crate::error::WsResult;
use krf_core::Symbol;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Feeds that require challenge authentication to subscribe.
const PRIVATE_FEEDS: &[&str] = &[
    "fills",
    "open_orders",
    "open_positions",
    "balances",
    "account_log",
    "notifications_auth",
];

/// Whether a feed needs the signed challenge on subscribe.
pub fn is_private_feed(feed: &str) -> bool {
    PRIVATE_FEEDS.contains(&feed)
}

/// Routing class for a parsed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Order book snapshots and deltas.
    Book,
    /// Account-private feeds (fills, orders, positions, balances).
    Private,
    /// Everything else (trades, heartbeats, unmodelled feeds).
    Generic,
}

/// Book side on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Buy,
    Sell,
}

/// One price level of a book snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub qty: Decimal,
}

/// Full book image sent once per subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct BookSnapshot {
    pub product_id: Symbol,
    pub seq: u64,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Incremental book update. `qty == 0` removes the level.
#[derive(Debug, Clone, Deserialize)]
pub struct BookDelta {
    pub product_id: Symbol,
    pub seq: u64,
    pub side: BookSide,
    pub price: Decimal,
    pub qty: Decimal,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Public trade print.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeEvent {
    pub product_id: Symbol,
    pub side: BookSide,
    pub price: Decimal,
    pub qty: Decimal,
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(default)]
    pub time: Option<i64>,
}

/// One execution from the private fills feed.
#[derive(Debug, Clone, Deserialize)]
pub struct WsFill {
    pub instrument: Symbol,
    pub fill_id: String,
    pub order_id: String,
    #[serde(default)]
    pub cli_ord_id: Option<String>,
    pub price: Decimal,
    pub qty: Decimal,
    pub buy: bool,
    #[serde(default)]
    pub fee_paid: Decimal,
    #[serde(default)]
    pub fill_type: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
}

/// `fills` / `fills_snapshot` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct FillsEvent {
    #[serde(default)]
    pub fills: Vec<WsFill>,
}

/// Order body inside `open_orders` events.
#[derive(Debug, Clone, Deserialize)]
pub struct WsOrder {
    pub instrument: Symbol,
    pub order_id: String,
    #[serde(default)]
    pub cli_ord_id: Option<String>,
    /// 0 = buy, 1 = sell.
    pub direction: u8,
    pub qty: Decimal,
    #[serde(default)]
    pub filled: Decimal,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(rename = "type", default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub last_update_time: Option<i64>,
}

/// Delta from the `open_orders` feed. Cancels arrive without a full
/// order body, carrying only `order_id` and a reason.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrdersEvent {
    #[serde(default)]
    pub order: Option<WsOrder>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub cli_ord_id: Option<String>,
    #[serde(default)]
    pub is_cancel: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// `open_orders_snapshot` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrdersSnapshot {
    #[serde(default)]
    pub orders: Vec<WsOrder>,
}

/// One entry of the `open_positions` feed.
#[derive(Debug, Clone, Deserialize)]
pub struct WsPosition {
    pub instrument: Symbol,
    pub balance: Decimal,
    #[serde(default)]
    pub entry_price: Option<Decimal>,
    #[serde(default)]
    pub mark_price: Option<Decimal>,
    #[serde(default)]
    pub liquidation_threshold: Option<Decimal>,
}

/// `open_positions` payload; the positions list replaces prior state.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenPositionsEvent {
    #[serde(default)]
    pub positions: Vec<WsPosition>,
}

/// Parsed WebSocket frame.
#[derive(Debug, Clone)]
pub enum WsMessage {
    Info {
        version: u64,
    },
    Challenge {
        message: String,
    },
    Subscribed {
        feed: String,
        product_ids: Vec<Symbol>,
    },
    Unsubscribed {
        feed: String,
        product_ids: Vec<Symbol>,
    },
    SubscribeError {
        feed: Option<String>,
        message: String,
    },
    BookSnapshot(BookSnapshot),
    BookDelta(BookDelta),
    Trade(TradeEvent),
    Fills {
        snapshot: bool,
        event: FillsEvent,
    },
    OpenOrders(OpenOrdersEvent),
    OpenOrdersSnapshot(OpenOrdersSnapshot),
    OpenPositions(OpenPositionsEvent),
    Balances(Value),
    Heartbeat,
    /// Recognized JSON, unmodelled feed or event.
    Other(Value),
}

impl WsMessage {
    /// The feed name carried by the frame, for seq tracking.
    pub fn feed(&self) -> Option<&str> {
        match self {
            Self::BookSnapshot(_) => Some("book_snapshot"),
            Self::BookDelta(_) => Some("book"),
            Self::Trade(_) => Some("trade"),
            Self::Fills { .. } => Some("fills"),
            Self::OpenOrders(_) | Self::OpenOrdersSnapshot(_) => Some("open_orders"),
            Self::OpenPositions(_) => Some("open_positions"),
            Self::Balances(_) => Some("balances"),
            _ => None,
        }
    }

    /// The product the frame is scoped to, when it has one.
    pub fn product_id(&self) -> Option<&Symbol> {
        match self {
            Self::BookSnapshot(s) => Some(&s.product_id),
            Self::BookDelta(d) => Some(&d.product_id),
            Self::Trade(t) => Some(&t.product_id),
            _ => None,
        }
    }

    /// Sequence number, for the feeds that carry one.
    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::BookSnapshot(s) => Some(s.seq),
            Self::BookDelta(d) => Some(d.seq),
            Self::Trade(t) => t.seq,
            _ => None,
        }
    }

    /// Which channel the frame belongs on.
    pub fn route(&self) -> Route {
        match self {
            Self::BookSnapshot(_) | Self::BookDelta(_) => Route::Book,
            Self::Fills { .. }
            | Self::OpenOrders(_)
            | Self::OpenOrdersSnapshot(_)
            | Self::OpenPositions(_)
            | Self::Balances(_) => Route::Private,
            _ => Route::Generic,
        }
    }
}

/// Parse one text frame.
///
/// Malformed JSON or a payload that does not match its declared feed
/// shape is an error; callers log and drop, the connection survives.
pub fn parse_frame(text: &str) -> WsResult<WsMessage> {
    let value: Value = serde_json::from_str(text)?;

    if let Some(event) = value.get("event").and_then(Value::as_str) {
        return parse_event(event, &value);
    }

    if let Some(feed) = value.get("feed").and_then(Value::as_str).map(str::to_owned) {
        return parse_feed(&feed, value);
    }

    Ok(WsMessage::Other(value))
}

fn parse_event(event: &str, value: &Value) -> WsResult<WsMessage> {
    let msg = match event {
        "info" => WsMessage::Info {
            version: value.get("version").and_then(Value::as_u64).unwrap_or(0),
        },
        "challenge" => WsMessage::Challenge {
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        "subscribed" | "unsubscribed" => {
            let feed = value
                .get("feed")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let product_ids = value
                .get("product_ids")
                .and_then(Value::as_array)
                .map(|ids| {
                    ids.iter()
                        .filter_map(Value::as_str)
                        .map(Symbol::new)
                        .collect()
                })
                .unwrap_or_default();
            if event == "subscribed" {
                WsMessage::Subscribed { feed, product_ids }
            } else {
                WsMessage::Unsubscribed { feed, product_ids }
            }
        }
        "error" => WsMessage::SubscribeError {
            feed: value
                .get("feed")
                .and_then(Value::as_str)
                .map(str::to_string),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        },
        _ => WsMessage::Other(value.clone()),
    };
    Ok(msg)
}

fn parse_feed(feed: &str, value: Value) -> WsResult<WsMessage> {
    let msg = match feed {
        "book_snapshot" => WsMessage::BookSnapshot(serde_json::from_value(value)?),
        "book" => WsMessage::BookDelta(serde_json::from_value(value)?),
        "trade" => WsMessage::Trade(serde_json::from_value(value)?),
        "trade_snapshot" => WsMessage::Other(value),
        "fills" | "fills_snapshot" => WsMessage::Fills {
            snapshot: feed == "fills_snapshot",
            event: serde_json::from_value(value)?,
        },
        "open_orders" | "open_orders_verbose" => {
            WsMessage::OpenOrders(serde_json::from_value(value)?)
        }
        "open_orders_snapshot" | "open_orders_verbose_snapshot" => {
            WsMessage::OpenOrdersSnapshot(serde_json::from_value(value)?)
        }
        "open_positions" => WsMessage::OpenPositions(serde_json::from_value(value)?),
        "balances" | "balances_snapshot" => WsMessage::Balances(value),
        "heartbeat" => WsMessage::Heartbeat,
        _ => WsMessage::Other(value),
    };
    Ok(msg)
}

/// Outbound challenge request.
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeRequest<'a> {
    pub event: &'static str,
    pub api_key: &'a str,
}

impl<'a> ChallengeRequest<'a> {
    pub fn new(api_key: &'a str) -> Self {
        Self {
            event: "challenge",
            api_key,
        }
    }
}

/// Outbound subscribe/unsubscribe request.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub event: &'static str,
    pub feed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_challenge: Option<String>,
}

impl SubscribeRequest {
    /// Public feed subscribe.
    pub fn public(feed: impl Into<String>, product_ids: &[Symbol]) -> Self {
        Self {
            event: "subscribe",
            feed: feed.into(),
            product_ids: product_id_strings(product_ids),
            api_key: None,
            original_challenge: None,
            signed_challenge: None,
        }
    }

    /// Private feed subscribe with the session challenge pair.
    pub fn private(
        feed: impl Into<String>,
        api_key: &str,
        original_challenge: &str,
        signed_challenge: &str,
    ) -> Self {
        Self {
            event: "subscribe",
            feed: feed.into(),
            product_ids: None,
            api_key: Some(api_key.to_string()),
            original_challenge: Some(original_challenge.to_string()),
            signed_challenge: Some(signed_challenge.to_string()),
        }
    }

    pub fn unsubscribe(feed: impl Into<String>, product_ids: &[Symbol]) -> Self {
        Self {
            event: "unsubscribe",
            feed: feed.into(),
            product_ids: product_id_strings(product_ids),
            api_key: None,
            original_challenge: None,
            signed_challenge: None,
        }
    }
}

fn product_id_strings(product_ids: &[Symbol]) -> Option<Vec<String>> {
    if product_ids.is_empty() {
        None
    } else {
        Some(product_ids.iter().map(|s| s.as_str().to_string()).collect())
    }
}
