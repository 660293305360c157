//! Per-(feed, product) sequence tracking.
//!
//! The exchange numbers book and trade frames per feed and product.
//! The connection never drops an out-of-order frame itself; it tags
//! the frame so the consumer (the book aggregator) decides how to
//! recover.

use krf_core::Symbol;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Outcome of observing one sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqCheck {
    /// First frame seen for this (feed, product).
    First,
    /// Contiguous with the previous frame.
    InOrder,
    /// At or behind the previous frame; a replay.
    Stale { last: u64 },
    /// Frames were skipped.
    Gap { expected: u64, got: u64 },
}

impl SeqCheck {
    pub fn is_gap(&self) -> bool {
        matches!(self, Self::Gap { .. })
    }
}

/// Tracks the last seen sequence number per (feed, product).
#[derive(Default)]
pub struct SeqTracker {
    last: RwLock<HashMap<(String, Symbol), u64>>,
}

impl SeqTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a frame's sequence number and advance the tracker.
    ///
    /// Gaps advance the tracker to `seq` so the stream resumes
    /// contiguity checks from the frame that revealed the gap.
    pub fn observe(&self, feed: &str, product_id: &Symbol, seq: u64) -> SeqCheck {
        let key = (feed.to_string(), product_id.clone());
        let mut last = self.last.write();
        match last.get(&key).copied() {
            None => {
                last.insert(key, seq);
                SeqCheck::First
            }
            Some(prev) if seq == prev + 1 => {
                last.insert(key, seq);
                SeqCheck::InOrder
            }
            Some(prev) if seq <= prev => SeqCheck::Stale { last: prev },
            Some(prev) => {
                last.insert(key, seq);
                SeqCheck::Gap {
                    expected: prev + 1,
                    got: seq,
                }
            }
        }
    }

    /// Forget all sequence state. Called on reconnect; the exchange
    /// restarts numbering per session.
    pub fn reset(&self) {
        self.last.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym() -> Symbol {
        Symbol::new("PI_XBTUSD")
    }

    #[test]
    fn test_first_then_in_order() {
        let tracker = SeqTracker::new();
        assert_eq!(tracker.observe("book", &sym(), 10), SeqCheck::First);
        assert_eq!(tracker.observe("book", &sym(), 11), SeqCheck::InOrder);
        assert_eq!(tracker.observe("book", &sym(), 12), SeqCheck::InOrder);
    }

    #[test]
    fn test_stale_replay_detected() {
        let tracker = SeqTracker::new();
        tracker.observe("book", &sym(), 10);
        assert_eq!(
            tracker.observe("book", &sym(), 10),
            SeqCheck::Stale { last: 10 }
        );
        assert_eq!(
            tracker.observe("book", &sym(), 7),
            SeqCheck::Stale { last: 10 }
        );
        // Stale frames do not advance the tracker.
        assert_eq!(tracker.observe("book", &sym(), 11), SeqCheck::InOrder);
    }

    #[test]
    fn test_gap_flagged_and_resumes() {
        let tracker = SeqTracker::new();
        tracker.observe("book", &sym(), 10);
        assert_eq!(
            tracker.observe("book", &sym(), 15),
            SeqCheck::Gap {
                expected: 11,
                got: 15
            }
        );
        // Stream resumes from the gap frame.
        assert_eq!(tracker.observe("book", &sym(), 16), SeqCheck::InOrder);
    }

    #[test]
    fn test_feeds_and_products_independent() {
        let tracker = SeqTracker::new();
        let eth = Symbol::new("PI_ETHUSD");
        tracker.observe("book", &sym(), 10);
        assert_eq!(tracker.observe("book", &eth, 3), SeqCheck::First);
        assert_eq!(tracker.observe("trade", &sym(), 1), SeqCheck::First);
    }

    #[test]
    fn test_reset_forgets_state() {
        let tracker = SeqTracker::new();
        tracker.observe("book", &sym(), 10);
        tracker.reset();
        assert_eq!(tracker.observe("book", &sym(), 1), SeqCheck::First);
    }
}
