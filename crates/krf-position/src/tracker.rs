//! Order lifecycle and position tracking actor.
//!
//! REST acks and WebSocket events for the same order race freely; the
//! tracker serializes them by funneling every mutation through one
//! actor task. The pure state machine lives in [`LifecycleState`] so
//! the merge rules are testable without a runtime; the actor is a thin
//! message loop around it.
//!
//! DashMap caches shared with [`TrackerHandle`] give callers
//! synchronous reads without an async round-trip. Only the actor
//! writes them, after each mutation, so readers always see a state the
//! actor actually reached.
//!
//! Merge rules:
//! - Terminal states are never overwritten.
//! - A submit ack never resets fill progress that WS delivered first.
//! - Fills are deduplicated by fill id; `filled` is capped at the
//!   order quantity.
//! - Events for unknown orders are logged and ignored; the stream
//!   continues.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{TrackerError, TrackerResult};
use krf_core::{
    ClientOrderId, Fill, FillId, Order, OrderId, OrderSide, OrderStatus, Position,
    PositionOrigin, Price, Qty, Symbol,
};

/// Dedup window for execution ids.
const MAX_SEEN_FILLS: usize = 10_000;

/// How an order or cancel ack identifies its order. REST acks carry
/// the exchange id, WS events may carry either.
#[derive(Debug, Clone)]
pub enum OrderRef {
    Cloid(ClientOrderId),
    Oid(OrderId),
}

impl From<ClientOrderId> for OrderRef {
    fn from(cloid: ClientOrderId) -> Self {
        Self::Cloid(cloid)
    }
}

impl From<OrderId> for OrderRef {
    fn from(oid: OrderId) -> Self {
        Self::Oid(oid)
    }
}

/// Outcome of a submit ack.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Placed { order_id: Option<OrderId> },
    Rejected { reason: String },
}

/// One execution event, from the WS fills feed or a fills poll.
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub fill_id: FillId,
    pub order_id: OrderId,
    pub client_order_id: Option<ClientOrderId>,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub price: Price,
    pub qty: Qty,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Messages processed by the tracker actor.
#[derive(Debug)]
pub enum TrackerMsg {
    /// Register a freshly submitted order intent.
    Track(Order),
    /// REST submit ack (batch acks are unrolled into one per order).
    SubmitAck {
        client_order_id: ClientOrderId,
        outcome: SubmitOutcome,
    },
    /// REST edit ack: new quantity and/or limit price, never `filled`.
    EditAck {
        order: OrderRef,
        quantity: Option<Qty>,
        limit_price: Option<Price>,
    },
    /// Cancellation, from a REST ack or the open_orders feed.
    Cancelled { order: OrderRef, reason: String },
    /// Expiry from the open_orders feed.
    Expired { order: OrderRef },
    /// Execution event.
    Fill(FillEvent),
    /// Wholesale position replacement from an open_positions snapshot.
    PositionsSnapshot(Vec<Position>),
    /// Seed an already-filled order and its position (assignment path).
    Seed { order: Order, position: Position },
    /// Graceful shutdown.
    Shutdown,
}

/// Pure lifecycle state: every merge rule, no I/O.
#[derive(Default)]
pub struct LifecycleState {
    orders: HashMap<ClientOrderId, Order>,
    oid_index: HashMap<OrderId, ClientOrderId>,
    seen_fills: HashSet<FillId>,
    seen_fill_order: VecDeque<FillId>,
    fills: HashMap<ClientOrderId, Vec<Fill>>,
    positions: HashMap<Symbol, Position>,
}

impl LifecycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order(&self, cloid: &ClientOrderId) -> Option<&Order> {
        self.orders.get(cloid)
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Deduplicated execution records for an order, in arrival order.
    pub fn fills(&self, cloid: &ClientOrderId) -> &[Fill] {
        self.fills.get(cloid).map_or(&[], Vec::as_slice)
    }

    fn resolve(&self, order_ref: &OrderRef) -> Option<ClientOrderId> {
        match order_ref {
            OrderRef::Cloid(cloid) => Some(cloid.clone()),
            OrderRef::Oid(oid) => self.oid_index.get(oid).cloned(),
        }
    }

    /// Register a submitted order. Re-tracking an existing order is a
    /// no-op so a retry cannot reset progress.
    pub fn track(&mut self, order: Order) {
        if self.orders.contains_key(&order.client_order_id) {
            debug!(cloid = %order.client_order_id, "order already tracked");
            return;
        }
        if let Some(oid) = &order.order_id {
            self.oid_index.insert(oid.clone(), order.client_order_id.clone());
        }
        self.orders.insert(order.client_order_id.clone(), order);
    }

    /// Apply a REST submit ack.
    ///
    /// The ack is optimistic (Placed, nothing filled) but must never
    /// clobber fill progress if WS events won the race.
    pub fn submit_ack(&mut self, cloid: &ClientOrderId, outcome: SubmitOutcome) {
        let Some(order) = self.orders.get_mut(cloid) else {
            warn!(%cloid, "submit ack for unknown order, ignored");
            return;
        };
        match outcome {
            SubmitOutcome::Placed { order_id } => {
                if let Some(oid) = order_id {
                    self.oid_index.insert(oid.clone(), cloid.clone());
                    order.order_id = Some(oid);
                }
                // Upgrade Submitted only; fills may already have moved
                // the order past Placed.
                if order.status == OrderStatus::Submitted {
                    order.status = OrderStatus::Placed;
                }
            }
            SubmitOutcome::Rejected { reason } => {
                if order.is_terminal() {
                    debug!(%cloid, "rejection after terminal state, ignored");
                } else {
                    warn!(%cloid, %reason, "order rejected");
                    order.status = OrderStatus::Rejected;
                }
            }
        }
        order.last_update = Utc::now();
    }

    /// Apply an edit ack: quantity and limit price only.
    pub fn edit_ack(
        &mut self,
        order_ref: &OrderRef,
        quantity: Option<Qty>,
        limit_price: Option<Price>,
    ) {
        let Some(cloid) = self.resolve(order_ref) else {
            warn!(?order_ref, "edit ack for unknown order, ignored");
            return;
        };
        let Some(order) = self.orders.get_mut(&cloid) else {
            return;
        };
        if order.is_terminal() {
            debug!(%cloid, "edit ack after terminal state, ignored");
            return;
        }
        if let Some(qty) = quantity {
            order.quantity = qty;
            // An edit can shrink below what already executed; clamp so
            // `filled <= quantity` holds.
            if order.filled > order.quantity {
                order.filled = order.quantity;
            }
            if order.is_fully_filled() {
                order.status = OrderStatus::Filled;
            }
        }
        if let Some(price) = limit_price {
            order.order_type.set_limit_price(price);
        }
        order.last_update = Utc::now();
    }

    /// Mark an order terminal with a cancel-class status.
    pub fn terminate(&mut self, order_ref: &OrderRef, status: OrderStatus, reason: &str) {
        let Some(cloid) = self.resolve(order_ref) else {
            warn!(?order_ref, reason, "cancel for unknown order, ignored");
            return;
        };
        let Some(order) = self.orders.get_mut(&cloid) else {
            return;
        };
        if order.is_terminal() {
            debug!(%cloid, reason, "already terminal, ignored");
            return;
        }
        order.status = status;
        order.last_update = Utc::now();
        debug!(%cloid, %status, reason, "order terminal");
    }

    /// Apply one execution. Returns false for a duplicate.
    pub fn fill(&mut self, event: FillEvent) -> bool {
        if !self.seen_fills.insert(event.fill_id.clone()) {
            debug!(fill_id = %event.fill_id, "duplicate fill, ignored");
            return false;
        }
        // Bound the dedup set oldest-first so recent ids keep
        // deduplicating across snapshot replays.
        self.seen_fill_order.push_back(event.fill_id.clone());
        if self.seen_fill_order.len() > MAX_SEEN_FILLS {
            if let Some(oldest) = self.seen_fill_order.pop_front() {
                self.seen_fills.remove(&oldest);
            }
        }

        self.apply_fill_to_order(&event);
        self.apply_fill_to_position(&event);
        true
    }

    fn apply_fill_to_order(&mut self, event: &FillEvent) {
        let cloid = event
            .client_order_id
            .clone()
            .or_else(|| self.oid_index.get(&event.order_id).cloned());
        let Some(cloid) = cloid else {
            warn!(order_id = %event.order_id, "fill for unknown order, ignored");
            return;
        };
        let Some(order) = self.orders.get_mut(&cloid) else {
            warn!(%cloid, "fill for untracked order, ignored");
            return;
        };
        if order.is_terminal() && order.status != OrderStatus::Filled {
            debug!(%cloid, "fill after terminal state, ignored");
            return;
        }
        if order.order_id.is_none() {
            self.oid_index
                .insert(event.order_id.clone(), cloid.clone());
            order.order_id = Some(event.order_id.clone());
        }

        order.filled = order.filled.add_capped(event.qty, order.quantity);
        order.status = if order.is_fully_filled() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        order.last_update = event.timestamp;

        self.fills.entry(cloid).or_default().push(Fill {
            fill_id: event.fill_id.clone(),
            order_id: event.order_id.clone(),
            price: event.price,
            qty: event.qty,
            fee: event.fee,
            timestamp: event.timestamp,
        });
    }

    fn apply_fill_to_position(&mut self, event: &FillEvent) {
        let signed_qty = event.qty.inner() * Decimal::from(event.side.sign());

        match self.positions.get_mut(&event.symbol) {
            Some(position) => {
                let old_balance = position.balance;
                let new_balance = old_balance + signed_qty;

                if new_balance.is_zero() {
                    self.positions.remove(&event.symbol);
                    debug!(symbol = %event.symbol, "position closed");
                    return;
                }
                // Both balances are nonzero here, so the sign bit alone
                // decides the side.
                let same_side =
                    old_balance.is_sign_positive() == new_balance.is_sign_positive();
                if same_side && new_balance.abs() > old_balance.abs() {
                    // Increasing exposure: weighted average entry.
                    let old_notional = old_balance.abs() * position.entry_price.inner();
                    let fill_notional = event.qty.inner() * event.price.inner();
                    position.entry_price =
                        Price::new((old_notional + fill_notional) / new_balance.abs());
                } else if !same_side {
                    // Flipped through zero: fresh exposure at fill price.
                    position.entry_price = event.price;
                    position.origin = PositionOrigin::Opened;
                }
                position.balance = new_balance;
                position.last_update = event.timestamp;
            }
            None => {
                self.positions.insert(
                    event.symbol.clone(),
                    Position {
                        symbol: event.symbol.clone(),
                        balance: signed_qty,
                        entry_price: event.price,
                        mark_price: None,
                        liquidation_threshold: None,
                        origin: PositionOrigin::Opened,
                        last_update: event.timestamp,
                    },
                );
            }
        }
    }

    /// Replace the position set wholesale, keeping `Assigned` origin
    /// for symbols the tracker already knows as assigned.
    pub fn positions_snapshot(&mut self, snapshot: Vec<Position>) {
        let mut next: HashMap<Symbol, Position> = HashMap::with_capacity(snapshot.len());
        for mut position in snapshot {
            if position.balance.is_zero() {
                continue;
            }
            if let Some(existing) = self.positions.get(&position.symbol) {
                if existing.origin == PositionOrigin::Assigned {
                    position.origin = PositionOrigin::Assigned;
                }
            }
            next.insert(position.symbol.clone(), position);
        }
        self.positions = next;
    }

    /// Seed a pre-filled order and its position (assignment entry).
    pub fn seed(&mut self, order: Order, position: Position) {
        if let Some(oid) = &order.order_id {
            self.oid_index.insert(oid.clone(), order.client_order_id.clone());
        }
        self.orders.insert(order.client_order_id.clone(), order);
        self.positions.insert(position.symbol.clone(), position);
    }
}

/// Tracker actor: one task, sequential mutations, cache publication.
pub struct TrackerTask {
    rx: mpsc::Receiver<TrackerMsg>,
    state: LifecycleState,
    orders_cache: Arc<DashMap<ClientOrderId, Order>>,
    positions_cache: Arc<DashMap<Symbol, Position>>,
    fills_cache: Arc<DashMap<ClientOrderId, Vec<Fill>>>,
}

impl TrackerTask {
    pub async fn run(mut self) {
        debug!("tracker task started");
        while let Some(msg) = self.rx.recv().await {
            if matches!(msg, TrackerMsg::Shutdown) {
                break;
            }
            self.handle(msg);
        }
        debug!("tracker task terminated");
    }

    fn handle(&mut self, msg: TrackerMsg) {
        match msg {
            TrackerMsg::Track(order) => {
                let cloid = order.client_order_id.clone();
                self.state.track(order);
                self.publish_order(&cloid);
            }
            TrackerMsg::SubmitAck {
                client_order_id,
                outcome,
            } => {
                self.state.submit_ack(&client_order_id, outcome);
                self.publish_order(&client_order_id);
            }
            TrackerMsg::EditAck {
                order,
                quantity,
                limit_price,
            } => {
                let cloid = self.state.resolve(&order);
                self.state.edit_ack(&order, quantity, limit_price);
                if let Some(cloid) = cloid {
                    self.publish_order(&cloid);
                }
            }
            TrackerMsg::Cancelled { order, reason } => {
                let cloid = self.state.resolve(&order);
                self.state.terminate(&order, OrderStatus::Cancelled, &reason);
                if let Some(cloid) = cloid {
                    self.publish_order(&cloid);
                }
            }
            TrackerMsg::Expired { order } => {
                let cloid = self.state.resolve(&order);
                self.state.terminate(&order, OrderStatus::Expired, "expired");
                if let Some(cloid) = cloid {
                    self.publish_order(&cloid);
                }
            }
            TrackerMsg::Fill(event) => {
                let symbol = event.symbol.clone();
                let cloid = event
                    .client_order_id
                    .clone()
                    .or_else(|| self.state.resolve(&OrderRef::Oid(event.order_id.clone())));
                self.state.fill(event);
                if let Some(cloid) = cloid {
                    self.publish_order(&cloid);
                    self.publish_fills(&cloid);
                }
                self.publish_position(&symbol);
            }
            TrackerMsg::PositionsSnapshot(snapshot) => {
                self.state.positions_snapshot(snapshot);
                self.positions_cache.clear();
                for (symbol, position) in &self.state.positions {
                    self.positions_cache.insert(symbol.clone(), position.clone());
                }
            }
            TrackerMsg::Seed { order, position } => {
                let cloid = order.client_order_id.clone();
                let symbol = position.symbol.clone();
                self.state.seed(order, position);
                self.publish_order(&cloid);
                self.publish_position(&symbol);
            }
            TrackerMsg::Shutdown => unreachable!("handled in run()"),
        }
    }

    fn publish_order(&self, cloid: &ClientOrderId) {
        match self.state.order(cloid) {
            Some(order) => {
                self.orders_cache.insert(cloid.clone(), order.clone());
            }
            None => {
                self.orders_cache.remove(cloid);
            }
        }
    }

    fn publish_fills(&self, cloid: &ClientOrderId) {
        let fills = self.state.fills(cloid);
        if !fills.is_empty() {
            self.fills_cache.insert(cloid.clone(), fills.to_vec());
        }
    }

    fn publish_position(&self, symbol: &Symbol) {
        match self.state.position(symbol) {
            Some(position) => {
                self.positions_cache.insert(symbol.clone(), position.clone());
            }
            None => {
                self.positions_cache.remove(symbol);
            }
        }
    }
}

/// Cloneable handle: async event submission, sync cache reads.
#[derive(Clone)]
pub struct TrackerHandle {
    tx: mpsc::Sender<TrackerMsg>,
    orders_cache: Arc<DashMap<ClientOrderId, Order>>,
    positions_cache: Arc<DashMap<Symbol, Position>>,
    fills_cache: Arc<DashMap<ClientOrderId, Vec<Fill>>>,
}

impl TrackerHandle {
    async fn send(&self, msg: TrackerMsg) -> TrackerResult<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| TrackerError::ChannelClosed)
    }

    pub async fn track(&self, order: Order) -> TrackerResult<()> {
        self.send(TrackerMsg::Track(order)).await
    }

    pub async fn submit_ack(
        &self,
        client_order_id: ClientOrderId,
        outcome: SubmitOutcome,
    ) -> TrackerResult<()> {
        self.send(TrackerMsg::SubmitAck {
            client_order_id,
            outcome,
        })
        .await
    }

    pub async fn edit_ack(
        &self,
        order: impl Into<OrderRef>,
        quantity: Option<Qty>,
        limit_price: Option<Price>,
    ) -> TrackerResult<()> {
        self.send(TrackerMsg::EditAck {
            order: order.into(),
            quantity,
            limit_price,
        })
        .await
    }

    pub async fn cancelled(
        &self,
        order: impl Into<OrderRef>,
        reason: impl Into<String>,
    ) -> TrackerResult<()> {
        self.send(TrackerMsg::Cancelled {
            order: order.into(),
            reason: reason.into(),
        })
        .await
    }

    pub async fn expired(&self, order: impl Into<OrderRef>) -> TrackerResult<()> {
        self.send(TrackerMsg::Expired {
            order: order.into(),
        })
        .await
    }

    pub async fn fill(&self, event: FillEvent) -> TrackerResult<()> {
        self.send(TrackerMsg::Fill(event)).await
    }

    pub async fn positions_snapshot(&self, snapshot: Vec<Position>) -> TrackerResult<()> {
        self.send(TrackerMsg::PositionsSnapshot(snapshot)).await
    }

    pub(crate) async fn seed(&self, order: Order, position: Position) -> TrackerResult<()> {
        self.send(TrackerMsg::Seed { order, position }).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(TrackerMsg::Shutdown).await;
    }

    // === Sync cache reads ===

    pub fn order(&self, cloid: &ClientOrderId) -> Option<Order> {
        self.orders_cache.get(cloid).map(|r| r.clone())
    }

    pub fn position(&self, symbol: &Symbol) -> Option<Position> {
        self.positions_cache.get(symbol).map(|r| r.clone())
    }

    /// Execution records for an order, deduplicated, in arrival order.
    pub fn fills(&self, cloid: &ClientOrderId) -> Vec<Fill> {
        self.fills_cache
            .get(cloid)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn open_orders(&self) -> Vec<Order> {
        self.orders_cache
            .iter()
            .filter(|r| !r.is_terminal())
            .map(|r| r.clone())
            .collect()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions_cache.iter().map(|r| r.clone()).collect()
    }
}

/// Spawn the tracker actor; returns the handle and the join handle.
#[must_use]
pub fn spawn_tracker(capacity: usize) -> (TrackerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity);
    let orders_cache = Arc::new(DashMap::new());
    let positions_cache = Arc::new(DashMap::new());
    let fills_cache = Arc::new(DashMap::new());

    let task = TrackerTask {
        rx,
        state: LifecycleState::new(),
        orders_cache: orders_cache.clone(),
        positions_cache: positions_cache.clone(),
        fills_cache: fills_cache.clone(),
    };
    let handle = TrackerHandle {
        tx,
        orders_cache,
        positions_cache,
        fills_cache,
    };
    let join = tokio::spawn(task.run());
    (handle, join)
}
