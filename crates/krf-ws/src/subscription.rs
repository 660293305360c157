//! Subscription state tracking.
//!
//! Each registered feed moves Pending -> Active on a `subscribed`
//! event, or Pending -> Failed on an `error` event. A failed feed
//! never tears down the connection; it is retried on the next
//! reconnect along with everything else.

use crate::message::is_private_feed;
use krf_core::Symbol;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Subscribe sent, no ack yet.
    Pending,
    /// Acked by the exchange.
    Active,
    /// Rejected; retried on the next reconnect.
    Failed,
}

/// One registered feed subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub feed: String,
    pub product_ids: Vec<Symbol>,
    pub state: SubscriptionState,
}

impl Subscription {
    pub fn is_private(&self) -> bool {
        is_private_feed(&self.feed)
    }
}

/// Tracks every subscription registered for the session, keyed by feed.
#[derive(Default)]
pub struct SubscriptionManager {
    subscriptions: RwLock<HashMap<String, Subscription>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a feed. Registering an existing feed merges the
    /// product list and resets it to Pending.
    pub fn register(&self, feed: impl Into<String>, product_ids: Vec<Symbol>) {
        let feed = feed.into();
        let mut subs = self.subscriptions.write();
        let entry = subs.entry(feed.clone()).or_insert_with(|| Subscription {
            feed,
            product_ids: Vec::new(),
            state: SubscriptionState::Pending,
        });
        for id in product_ids {
            if !entry.product_ids.contains(&id) {
                entry.product_ids.push(id);
            }
        }
        entry.state = SubscriptionState::Pending;
    }

    pub fn mark_active(&self, feed: &str) {
        if let Some(sub) = self.subscriptions.write().get_mut(feed) {
            sub.state = SubscriptionState::Active;
            info!(feed, "subscription active");
        }
    }

    pub fn mark_failed(&self, feed: &str, reason: &str) {
        if let Some(sub) = self.subscriptions.write().get_mut(feed) {
            sub.state = SubscriptionState::Failed;
            warn!(feed, reason, "subscription failed");
        }
    }

    /// Reset every subscription to Pending, including Failed ones.
    /// Called before resubscribing on reconnect.
    pub fn reset_for_reconnect(&self) {
        for sub in self.subscriptions.write().values_mut() {
            sub.state = SubscriptionState::Pending;
        }
    }

    pub fn state(&self, feed: &str) -> Option<SubscriptionState> {
        self.subscriptions.read().get(feed).map(|s| s.state)
    }

    /// All registered subscriptions, for the resubscribe pass.
    pub fn all(&self) -> Vec<Subscription> {
        self.subscriptions.read().values().cloned().collect()
    }

    pub fn all_active(&self) -> bool {
        let subs = self.subscriptions.read();
        !subs.is_empty()
            && subs
                .values()
                .all(|s| s.state == SubscriptionState::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_to_active() {
        let manager = SubscriptionManager::new();
        manager.register("book", vec![Symbol::new("PI_XBTUSD")]);
        assert_eq!(manager.state("book"), Some(SubscriptionState::Pending));

        manager.mark_active("book");
        assert_eq!(manager.state("book"), Some(SubscriptionState::Active));
        assert!(manager.all_active());
    }

    #[test]
    fn test_failure_is_not_fatal_to_others() {
        let manager = SubscriptionManager::new();
        manager.register("book", vec![Symbol::new("PI_XBTUSD")]);
        manager.register("fills", vec![]);

        manager.mark_active("book");
        manager.mark_failed("fills", "permission denied");

        assert_eq!(manager.state("book"), Some(SubscriptionState::Active));
        assert_eq!(manager.state("fills"), Some(SubscriptionState::Failed));
        assert!(!manager.all_active());
    }

    #[test]
    fn test_failed_retried_on_reconnect() {
        let manager = SubscriptionManager::new();
        manager.register("fills", vec![]);
        manager.mark_failed("fills", "nope");

        manager.reset_for_reconnect();
        assert_eq!(manager.state("fills"), Some(SubscriptionState::Pending));
    }

    #[test]
    fn test_register_merges_products() {
        let manager = SubscriptionManager::new();
        manager.register("book", vec![Symbol::new("PI_XBTUSD")]);
        manager.register("book", vec![Symbol::new("PI_ETHUSD"), Symbol::new("PI_XBTUSD")]);

        let subs = manager.all();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].product_ids.len(), 2);
    }

    #[test]
    fn test_privateness_derived_from_feed() {
        let manager = SubscriptionManager::new();
        manager.register("fills", vec![]);
        manager.register("book", vec![Symbol::new("PI_XBTUSD")]);

        let subs = manager.all();
        let fills = subs.iter().find(|s| s.feed == "fills").unwrap();
        let book = subs.iter().find(|s| s.feed == "book").unwrap();
        assert!(fills.is_private());
        assert!(!book.is_private());
    }
}
