//! End-to-end lifecycle scenarios through the tracker actor:
//! REST acks and WebSocket events interleaving in every order.

use chrono::Utc;
use krf_core::{
    ClientOrderId, FillId, Order, OrderId, OrderSide, OrderStatus, OrderType, PositionOrigin,
    Price, Qty, Symbol,
};
use krf_position::{
    spawn_tracker, Assignment, FillEvent, PositionAssignmentAdapter, SubmitOutcome, TrackerHandle,
};
use rust_decimal_macros::dec;
use std::time::Duration;

fn sym() -> Symbol {
    Symbol::new("PF_XBTUSD")
}

fn cloid(s: &str) -> ClientOrderId {
    ClientOrderId::from_string(s.to_string())
}

fn limit_order(id: &str, qty: rust_decimal::Decimal) -> Order {
    Order::new(
        cloid(id),
        sym(),
        OrderSide::Buy,
        OrderType::Limit {
            limit_price: Price::new(dec!(9400)),
        },
        Qty::new(qty),
    )
}

fn fill_event(fill_id: &str, order: &str, qty: rust_decimal::Decimal, side: OrderSide) -> FillEvent {
    FillEvent {
        fill_id: FillId::new(fill_id),
        order_id: OrderId::new(format!("oid-{order}")),
        client_order_id: Some(cloid(order)),
        symbol: sym(),
        side,
        price: Price::new(dec!(9400)),
        qty: Qty::new(qty),
        fee: dec!(0.5),
        timestamp: Utc::now(),
    }
}

async fn settle(handle: &TrackerHandle) {
    // Let the actor drain its queue.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let _ = handle;
}

#[tokio::test]
async fn partial_fills_converge_to_filled() {
    let (handle, _join) = spawn_tracker(64);

    handle.track(limit_order("a", dec!(1000))).await.unwrap();
    handle
        .submit_ack(
            cloid("a"),
            SubmitOutcome::Placed {
                order_id: Some(OrderId::new("oid-a")),
            },
        )
        .await
        .unwrap();

    handle
        .fill(fill_event("f1", "a", dec!(400), OrderSide::Buy))
        .await
        .unwrap();
    settle(&handle).await;

    let order = handle.order(&cloid("a")).unwrap();
    assert_eq!(order.status, OrderStatus::PartiallyFilled);
    assert_eq!(order.remaining(), Qty::new(dec!(600)));

    handle
        .fill(fill_event("f2", "a", dec!(600), OrderSide::Buy))
        .await
        .unwrap();
    settle(&handle).await;

    let order = handle.order(&cloid("a")).unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled, Qty::new(dec!(1000)));
    assert!(order.is_terminal());

    // Position mirrors the executed quantity.
    assert_eq!(handle.position(&sym()).unwrap().balance, dec!(1000));
    handle.shutdown().await;
}

#[tokio::test]
async fn ws_events_before_rest_ack_are_not_lost() {
    let (handle, _join) = spawn_tracker(64);

    handle.track(limit_order("a", dec!(1000))).await.unwrap();

    // The exchange executes and streams the fill before the REST ack
    // makes it back.
    handle
        .fill(fill_event("f1", "a", dec!(1000), OrderSide::Buy))
        .await
        .unwrap();
    handle
        .submit_ack(
            cloid("a"),
            SubmitOutcome::Placed {
                order_id: Some(OrderId::new("oid-a")),
            },
        )
        .await
        .unwrap();
    settle(&handle).await;

    let order = handle.order(&cloid("a")).unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled, Qty::new(dec!(1000)));
    assert_eq!(order.order_id, Some(OrderId::new("oid-a")));
    handle.shutdown().await;
}

#[tokio::test]
async fn duplicate_fill_delivery_is_idempotent() {
    let (handle, _join) = spawn_tracker(64);

    handle.track(limit_order("a", dec!(1000))).await.unwrap();
    // Same execution delivered twice (e.g. snapshot + live feed).
    handle
        .fill(fill_event("f1", "a", dec!(400), OrderSide::Buy))
        .await
        .unwrap();
    handle
        .fill(fill_event("f1", "a", dec!(400), OrderSide::Buy))
        .await
        .unwrap();
    settle(&handle).await;

    assert_eq!(
        handle.order(&cloid("a")).unwrap().filled,
        Qty::new(dec!(400))
    );
    assert_eq!(handle.position(&sym()).unwrap().balance, dec!(400));
    handle.shutdown().await;
}

#[tokio::test]
async fn cancel_racing_fill_keeps_first_terminal_state() {
    let (handle, _join) = spawn_tracker(64);

    handle.track(limit_order("a", dec!(1000))).await.unwrap();
    handle
        .fill(fill_event("f1", "a", dec!(1000), OrderSide::Buy))
        .await
        .unwrap();
    // Cancel ack arrives after the order already fully filled.
    handle.cancelled(cloid("a"), "cancelled_by_user").await.unwrap();
    settle(&handle).await;

    assert_eq!(handle.order(&cloid("a")).unwrap().status, OrderStatus::Filled);
    handle.shutdown().await;
}

#[tokio::test]
async fn batch_acks_unroll_per_order() {
    let (handle, _join) = spawn_tracker(64);

    // One batch, three orders: two placed, one rejected.
    for id in ["b1", "b2", "b3"] {
        handle.track(limit_order(id, dec!(10))).await.unwrap();
    }
    handle
        .submit_ack(
            cloid("b1"),
            SubmitOutcome::Placed {
                order_id: Some(OrderId::new("oid-b1")),
            },
        )
        .await
        .unwrap();
    handle
        .submit_ack(
            cloid("b2"),
            SubmitOutcome::Placed {
                order_id: Some(OrderId::new("oid-b2")),
            },
        )
        .await
        .unwrap();
    handle
        .submit_ack(
            cloid("b3"),
            SubmitOutcome::Rejected {
                reason: "wouldNotReducePosition".to_string(),
            },
        )
        .await
        .unwrap();
    settle(&handle).await;

    assert_eq!(handle.order(&cloid("b1")).unwrap().status, OrderStatus::Placed);
    assert_eq!(handle.order(&cloid("b2")).unwrap().status, OrderStatus::Placed);
    assert_eq!(handle.order(&cloid("b3")).unwrap().status, OrderStatus::Rejected);
    assert_eq!(handle.open_orders().len(), 2);
    handle.shutdown().await;
}

#[tokio::test]
async fn edit_ack_never_touches_fill_progress() {
    let (handle, _join) = spawn_tracker(64);

    handle.track(limit_order("a", dec!(1000))).await.unwrap();
    handle
        .fill(fill_event("f1", "a", dec!(300), OrderSide::Buy))
        .await
        .unwrap();
    handle
        .edit_ack(
            cloid("a"),
            Some(Qty::new(dec!(800))),
            Some(Price::new(dec!(9500))),
        )
        .await
        .unwrap();
    settle(&handle).await;

    let order = handle.order(&cloid("a")).unwrap();
    assert_eq!(order.quantity, Qty::new(dec!(800)));
    assert_eq!(order.filled, Qty::new(dec!(300)));
    assert_eq!(order.order_type.limit_price(), Some(Price::new(dec!(9500))));
    handle.shutdown().await;
}

#[tokio::test]
async fn assigned_position_managed_like_any_other() {
    let (handle, _join) = spawn_tracker(64);
    let adapter = PositionAssignmentAdapter::new(handle.clone());

    adapter
        .assign(Assignment {
            assignment_id: "assign-7".to_string(),
            symbol: sym(),
            side: OrderSide::Buy,
            quantity: Qty::new(dec!(250)),
            price: Price::new(dec!(31000)),
            timestamp: Utc::now(),
        })
        .await
        .unwrap();
    settle(&handle).await;

    // Synthetic order is terminal from birth; position is Assigned.
    let order = handle
        .order(&ClientOrderId::from_string("assignment_assign-7".to_string()))
        .unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled, Qty::new(dec!(250)));

    let position = handle.position(&sym()).unwrap();
    assert_eq!(position.origin, PositionOrigin::Assigned);
    assert_eq!(position.balance, dec!(250));

    // Closing flows through the normal fill path.
    handle.track(limit_order("close", dec!(250))).await.unwrap();
    handle
        .fill(fill_event("f-close", "close", dec!(250), OrderSide::Sell))
        .await
        .unwrap();
    settle(&handle).await;

    assert!(handle.position(&sym()).is_none());
    handle.shutdown().await;
}

#[tokio::test]
async fn private_frames_drive_the_tracker() {
    let (handle, _join) = spawn_tracker(64);

    handle.track(limit_order("krf_a", dec!(5000))).await.unwrap();

    // Wire frames straight off the private channel.
    let fills = krf_ws::parse_frame(
        r#"{
            "feed": "fills",
            "fills": [{
                "instrument": "PF_XBTUSD",
                "time": 1600256966528,
                "price": 9400,
                "buy": true,
                "qty": 5000,
                "order_id": "oid-krf_a",
                "fill_id": "c14ee7cb",
                "fill_type": "taker",
                "fee_paid": 0.0068,
                "cli_ord_id": "krf_a"
            }]
        }"#,
    )
    .unwrap();
    handle.apply_private_frame(fills).await.unwrap();
    settle(&handle).await;

    let order = handle.order(&cloid("krf_a")).unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled, Qty::new(dec!(5000)));
    assert_eq!(handle.fills(&cloid("krf_a")).len(), 1);
    assert_eq!(handle.position(&sym()).unwrap().balance, dec!(5000));

    // An open_positions frame replaces the position set wholesale.
    let positions = krf_ws::parse_frame(
        r#"{
            "feed": "open_positions",
            "positions": [{
                "instrument": "PF_ETHUSD",
                "balance": -10,
                "entry_price": 2000,
                "mark_price": 1990
            }]
        }"#,
    )
    .unwrap();
    handle.apply_private_frame(positions).await.unwrap();
    settle(&handle).await;

    assert!(handle.position(&sym()).is_none());
    let eth = handle.position(&Symbol::new("PF_ETHUSD")).unwrap();
    assert!(eth.is_short());
    assert_eq!(eth.mark_price, Some(Price::new(dec!(1990))));
    handle.shutdown().await;
}

#[tokio::test]
async fn open_orders_cancel_frame_terminates_order() {
    let (handle, _join) = spawn_tracker(64);

    handle.track(limit_order("krf_b", dec!(100))).await.unwrap();
    handle
        .submit_ack(
            cloid("krf_b"),
            SubmitOutcome::Placed {
                order_id: Some(OrderId::new("ea8a7144")),
            },
        )
        .await
        .unwrap();

    // Cancel delta carries only the exchange id and a reason.
    let cancel = krf_ws::parse_frame(
        r#"{
            "feed": "open_orders",
            "order_id": "ea8a7144",
            "is_cancel": true,
            "reason": "cancelled_by_user"
        }"#,
    )
    .unwrap();
    handle.apply_private_frame(cancel).await.unwrap();
    settle(&handle).await;

    assert_eq!(
        handle.order(&cloid("krf_b")).unwrap().status,
        OrderStatus::Cancelled
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn unknown_order_events_do_not_stop_the_stream() {
    let (handle, _join) = spawn_tracker(64);

    // Events for an order this process never submitted.
    handle
        .submit_ack(cloid("ghost"), SubmitOutcome::Placed { order_id: None })
        .await
        .unwrap();
    handle.cancelled(OrderId::new("ghost-oid"), "x").await.unwrap();

    // Stream continues: a real order still works.
    handle.track(limit_order("a", dec!(10))).await.unwrap();
    handle
        .fill(fill_event("f1", "a", dec!(10), OrderSide::Buy))
        .await
        .unwrap();
    settle(&handle).await;

    assert!(handle.order(&cloid("ghost")).is_none());
    assert_eq!(handle.order(&cloid("a")).unwrap().status, OrderStatus::Filled);
    handle.shutdown().await;
}
