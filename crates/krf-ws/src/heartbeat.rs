//! Link liveness monitoring.
//!
//! Pings are only sent when the link has been idle for close to the
//! interval; feed traffic counts as proof of life. A ping without a
//! pong inside the timeout means the connection is dead.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;
use tracing::debug;

pub struct Heartbeat {
    interval_ms: u64,
    timeout_ms: u64,
    last_ping: RwLock<Option<DateTime<Utc>>>,
    last_message: RwLock<DateTime<Utc>>,
    waiting_for_pong: RwLock<bool>,
}

impl Heartbeat {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval_ms,
            timeout_ms,
            last_ping: RwLock::new(None),
            last_message: RwLock::new(Utc::now()),
            waiting_for_pong: RwLock::new(false),
        }
    }

    /// Reset on (re)connect.
    pub fn reset(&self) {
        *self.last_ping.write() = None;
        *self.last_message.write() = Utc::now();
        *self.waiting_for_pong.write() = false;
    }

    pub fn record_ping(&self) {
        *self.last_ping.write() = Some(Utc::now());
        *self.waiting_for_pong.write() = true;
    }

    pub fn record_pong(&self) {
        if let Some(ping_time) = *self.last_ping.read() {
            let rtt_ms = (Utc::now() - ping_time).num_milliseconds();
            debug!(rtt_ms, "pong received");
        }
        *self.waiting_for_pong.write() = false;
    }

    /// Any inbound frame counts as liveness.
    pub fn record_message(&self) {
        *self.last_message.write() = Utc::now();
    }

    pub fn is_timed_out(&self) -> bool {
        if !*self.waiting_for_pong.read() {
            return false;
        }
        match *self.last_ping.read() {
            Some(ping_time) => {
                (Utc::now() - ping_time).num_milliseconds() > self.timeout_ms as i64
            }
            None => false,
        }
    }

    /// Ping when the link has idled into the last tick of the interval
    /// and we are not already waiting on a pong. Firing one tick early
    /// keeps the ping inside the interval instead of up to a tick past it.
    pub fn should_ping(&self) -> bool {
        if *self.waiting_for_pong.read() {
            return false;
        }
        let idle_ms = (Utc::now() - *self.last_message.read()).num_milliseconds();
        idle_ms >= self.interval_ms.saturating_sub(self.tick_ms()) as i64
    }

    fn tick_ms(&self) -> u64 {
        self.interval_ms / 4
    }

    /// Sleep until the next liveness check.
    pub async fn tick(&self) {
        tokio::time::sleep(Duration::from_millis(self.tick_ms().max(1))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_quiet() {
        let hb = Heartbeat::new(60_000, 10_000);
        assert!(!hb.is_timed_out());
        assert!(!hb.should_ping());
    }

    #[test]
    fn test_ping_pong_cycle() {
        let hb = Heartbeat::new(60_000, 10_000);
        hb.record_ping();
        assert!(*hb.waiting_for_pong.read());
        hb.record_pong();
        assert!(!*hb.waiting_for_pong.read());
        assert!(!hb.is_timed_out());
    }

    #[test]
    fn test_no_ping_while_waiting() {
        let hb = Heartbeat::new(0, 10_000);
        // interval 0 means any idle time warrants a ping
        assert!(hb.should_ping());
        hb.record_ping();
        assert!(!hb.should_ping());
    }

    #[test]
    fn test_traffic_suppresses_ping() {
        let hb = Heartbeat::new(60_000, 10_000);
        hb.record_message();
        assert!(!hb.should_ping());
    }

    #[test]
    fn test_ping_fires_within_interval() {
        let hb = Heartbeat::new(60_000, 10_000);
        // 30s idle: well short of the 45s threshold.
        *hb.last_message.write() = Utc::now() - chrono::Duration::seconds(30);
        assert!(!hb.should_ping());
        // 46s idle: past interval minus one tick (60s - 15s), so the
        // ping goes out before the full interval elapses.
        *hb.last_message.write() = Utc::now() - chrono::Duration::seconds(46);
        assert!(hb.should_ping());
    }
}
