//! Bridges parsed WebSocket frames into tracker inputs.
//!
//! The private channel delivers `WsMessage` frames; this module maps
//! them onto the tracker's event vocabulary so a consumer task can
//! forward frames without hand-rolling the field translation.

use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use crate::error::TrackerResult;
use crate::tracker::{FillEvent, OrderRef, TrackerHandle};
use krf_core::{
    ClientOrderId, FillId, OrderId, OrderSide, Position, PositionOrigin, Price, Qty,
};
use krf_ws::{OpenOrdersEvent, WsFill, WsMessage, WsPosition};

fn ms_to_utc(ms: Option<i64>) -> DateTime<Utc> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

impl From<WsFill> for FillEvent {
    fn from(fill: WsFill) -> Self {
        let side = if fill.buy {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        Self {
            fill_id: FillId::new(fill.fill_id),
            order_id: OrderId::new(fill.order_id),
            client_order_id: fill.cli_ord_id.map(ClientOrderId::from_string),
            symbol: fill.instrument,
            side,
            price: Price::new(fill.price),
            qty: Qty::new(fill.qty),
            fee: fill.fee_paid,
            timestamp: ms_to_utc(fill.time),
        }
    }
}

/// Convert one `open_positions` entry into a position record.
///
/// The feed omits the entry price for some position sources; zero
/// stands in until the next snapshot carries one.
pub fn position_from_ws(ws: &WsPosition) -> Position {
    Position {
        symbol: ws.instrument.clone(),
        balance: ws.balance,
        entry_price: Price::new(ws.entry_price.unwrap_or_default()),
        mark_price: ws.mark_price.map(Price::new),
        liquidation_threshold: ws.liquidation_threshold.map(Price::new),
        origin: PositionOrigin::Opened,
        last_update: Utc::now(),
    }
}

fn order_ref_from_event(event: &OpenOrdersEvent) -> Option<OrderRef> {
    if let Some(cloid) = &event.cli_ord_id {
        return Some(OrderRef::Cloid(ClientOrderId::from_string(cloid.clone())));
    }
    event
        .order_id
        .as_ref()
        .map(|oid| OrderRef::Oid(OrderId::new(oid.clone())))
}

impl TrackerHandle {
    /// Feed one private-channel frame into the tracker.
    ///
    /// Fills (live and snapshot) become fill events, `open_positions`
    /// replaces the position set, and `open_orders` cancels and edits
    /// are applied. Frames the tracker has no use for are dropped.
    pub async fn apply_private_frame(&self, msg: WsMessage) -> TrackerResult<()> {
        match msg {
            WsMessage::Fills { event, .. } => {
                for fill in event.fills {
                    self.fill(fill.into()).await?;
                }
                Ok(())
            }
            WsMessage::OpenPositions(event) => {
                let positions = event.positions.iter().map(position_from_ws).collect();
                self.positions_snapshot(positions).await
            }
            WsMessage::OpenOrders(event) if event.is_cancel => {
                let Some(order_ref) = order_ref_from_event(&event) else {
                    debug!("open_orders cancel without an order reference, dropped");
                    return Ok(());
                };
                let reason = event.reason.unwrap_or_else(|| "cancelled".to_string());
                self.cancelled(order_ref, reason).await
            }
            WsMessage::OpenOrders(event) => {
                let Some(order_ref) = order_ref_from_event(&event) else {
                    debug!("open_orders update without an order reference, dropped");
                    return Ok(());
                };
                let Some(order) = event.order else {
                    return Ok(());
                };
                self.edit_ack(
                    order_ref,
                    Some(Qty::new(order.qty)),
                    order.limit_price.map(Price::new),
                )
                .await
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ws_fill_maps_side_and_ids() {
        let ws = WsFill {
            instrument: krf_core::Symbol::new("PF_XBTUSD"),
            fill_id: "c14ee7cb".to_string(),
            order_id: "3696d19b".to_string(),
            cli_ord_id: Some("krf_1".to_string()),
            price: dec!(364.65),
            qty: dec!(5000),
            buy: false,
            fee_paid: dec!(0.0068),
            fill_type: Some("taker".to_string()),
            time: Some(1600256966528),
        };
        let event = FillEvent::from(ws);
        assert_eq!(event.side, OrderSide::Sell);
        assert_eq!(event.fill_id, FillId::new("c14ee7cb"));
        assert_eq!(
            event.client_order_id,
            Some(ClientOrderId::from_string("krf_1".to_string()))
        );
        assert_eq!(event.fee, dec!(0.0068));
        assert_eq!(event.timestamp.timestamp_millis(), 1600256966528);
    }

    #[test]
    fn test_ws_position_maps_optionals() {
        let ws = WsPosition {
            instrument: krf_core::Symbol::new("PF_ETHUSD"),
            balance: dec!(-10),
            entry_price: Some(dec!(2000)),
            mark_price: Some(dec!(1990)),
            liquidation_threshold: None,
        };
        let position = position_from_ws(&ws);
        assert!(position.is_short());
        assert_eq!(position.entry_price, Price::new(dec!(2000)));
        assert_eq!(position.mark_price, Some(Price::new(dec!(1990))));
        assert_eq!(position.liquidation_threshold, None);
        assert_eq!(position.origin, PositionOrigin::Opened);
    }
}
