//! Bridges parsed WebSocket book frames into the aggregator.

use crate::book::{DeltaOutcome, OrderBookAggregator};
use crate::error::BookResult;
use krf_core::{OrderSide, Price, Qty};
use krf_ws::{BookDelta, BookSide, BookSnapshot};

fn side_from_wire(side: BookSide) -> OrderSide {
    match side {
        BookSide::Buy => OrderSide::Buy,
        BookSide::Sell => OrderSide::Sell,
    }
}

impl OrderBookAggregator {
    /// Install a `book_snapshot` frame.
    pub fn apply_snapshot_frame(&self, snapshot: &BookSnapshot) {
        self.apply_snapshot(
            &snapshot.product_id,
            snapshot.seq,
            snapshot
                .bids
                .iter()
                .map(|l| (Price::new(l.price), Qty::new(l.qty))),
            snapshot
                .asks
                .iter()
                .map(|l| (Price::new(l.price), Qty::new(l.qty))),
        );
    }

    /// Apply a `book` delta frame.
    ///
    /// # Errors
    /// Same contract as [`OrderBookAggregator::apply_delta`].
    pub fn apply_delta_frame(&self, delta: &BookDelta) -> BookResult<DeltaOutcome> {
        self.apply_delta(
            &delta.product_id,
            delta.seq,
            side_from_wire(delta.side),
            Price::new(delta.price),
            Qty::new(delta.qty),
        )
    }
}
