//! Order book aggregation.
//!
//! One aggregator maintains books for any number of symbols. A
//! snapshot replaces the whole book; deltas apply strictly in
//! sequence. A replayed delta (`seq <= last`) is ignored, so feeding
//! the same stream twice converges on the same book. A skipped
//! sequence number poisons the book: state is discarded and only a
//! fresh snapshot brings the symbol back.

use crate::error::{BookError, BookResult};
use dashmap::DashMap;
use krf_core::{OrderSide, Price, Qty, Symbol};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Outcome of applying a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Applied in order.
    Applied,
    /// Replay of an already-applied sequence number; ignored.
    Stale,
}

/// Best bid and ask with their resting quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopOfBook {
    pub bid: Option<(Price, Qty)>,
    pub ask: Option<(Price, Qty)>,
}

/// Per-symbol book state. Both sides keyed ascending; bids are read
/// through a reverse iterator so the best bid is the highest price.
struct BookState {
    last_seq: u64,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

/// Multi-symbol order book aggregator.
#[derive(Default)]
pub struct OrderBookAggregator {
    books: DashMap<Symbol, BookState>,
}

impl OrderBookAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a snapshot, wholesale replacing any prior state for
    /// the symbol. Zero-quantity levels are dropped on entry.
    pub fn apply_snapshot(
        &self,
        symbol: &Symbol,
        seq: u64,
        bids: impl IntoIterator<Item = (Price, Qty)>,
        asks: impl IntoIterator<Item = (Price, Qty)>,
    ) {
        let state = BookState {
            last_seq: seq,
            bids: collect_levels(bids),
            asks: collect_levels(asks),
        };
        debug!(%symbol, seq, bids = state.bids.len(), asks = state.asks.len(), "snapshot applied");
        self.books.insert(symbol.clone(), state);
    }

    /// Apply one delta. `qty == 0` removes the level, otherwise the
    /// level is inserted or replaced.
    ///
    /// # Errors
    /// `NoSnapshot` when no snapshot has been applied for the symbol;
    /// `SequenceGap` when the delta skips sequence numbers, in which
    /// case the symbol's book is discarded.
    pub fn apply_delta(
        &self,
        symbol: &Symbol,
        seq: u64,
        side: OrderSide,
        price: Price,
        qty: Qty,
    ) -> BookResult<DeltaOutcome> {
        let Some(mut state) = self.books.get_mut(symbol) else {
            return Err(BookError::NoSnapshot {
                symbol: symbol.clone(),
            });
        };

        if seq <= state.last_seq {
            return Ok(DeltaOutcome::Stale);
        }
        if seq != state.last_seq + 1 {
            let expected = state.last_seq + 1;
            drop(state);
            self.books.remove(symbol);
            warn!(%symbol, expected, got = seq, "sequence gap, book discarded");
            return Err(BookError::SequenceGap {
                symbol: symbol.clone(),
                expected,
                got: seq,
            });
        }

        state.last_seq = seq;
        let levels = match side {
            OrderSide::Buy => &mut state.bids,
            OrderSide::Sell => &mut state.asks,
        };
        if qty.is_zero() {
            levels.remove(&price.inner());
        } else {
            levels.insert(price.inner(), qty.inner());
        }
        Ok(DeltaOutcome::Applied)
    }

    /// Whether the symbol currently has a valid book.
    pub fn is_synced(&self, symbol: &Symbol) -> bool {
        self.books.contains_key(symbol)
    }

    /// Last applied sequence number for the symbol.
    pub fn last_seq(&self, symbol: &Symbol) -> Option<u64> {
        self.books.get(symbol).map(|s| s.last_seq)
    }

    /// Discard a symbol's book (e.g. on unsubscribe).
    pub fn drop_book(&self, symbol: &Symbol) {
        self.books.remove(symbol);
    }

    pub fn best_bid(&self, symbol: &Symbol) -> Option<(Price, Qty)> {
        self.books.get(symbol).and_then(|s| {
            s.bids
                .iter()
                .next_back()
                .map(|(p, q)| (Price::new(*p), Qty::new(*q)))
        })
    }

    pub fn best_ask(&self, symbol: &Symbol) -> Option<(Price, Qty)> {
        self.books.get(symbol).and_then(|s| {
            s.asks
                .iter()
                .next()
                .map(|(p, q)| (Price::new(*p), Qty::new(*q)))
        })
    }

    pub fn top(&self, symbol: &Symbol) -> Option<TopOfBook> {
        if !self.is_synced(symbol) {
            return None;
        }
        Some(TopOfBook {
            bid: self.best_bid(symbol),
            ask: self.best_ask(symbol),
        })
    }

    /// Top `n` levels per side: bids descending, asks ascending.
    pub fn depth(&self, symbol: &Symbol, n: usize) -> Option<(Vec<(Price, Qty)>, Vec<(Price, Qty)>)> {
        self.books.get(symbol).map(|s| {
            let bids = s
                .bids
                .iter()
                .rev()
                .take(n)
                .map(|(p, q)| (Price::new(*p), Qty::new(*q)))
                .collect();
            let asks = s
                .asks
                .iter()
                .take(n)
                .map(|(p, q)| (Price::new(*p), Qty::new(*q)))
                .collect();
            (bids, asks)
        })
    }
}

fn collect_levels(levels: impl IntoIterator<Item = (Price, Qty)>) -> BTreeMap<Decimal, Decimal> {
    levels
        .into_iter()
        .filter(|(_, qty)| !qty.is_zero())
        .map(|(price, qty)| (price.inner(), qty.inner()))
        .collect()
}
