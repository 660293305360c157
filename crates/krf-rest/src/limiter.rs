//! Dual-pool rate limiting for REST dispatch.
//!
//! Two independent budgets gate every outbound call:
//! - **Derivatives** pool: 500 cost units per 10 seconds. The window
//!   policy is configurable (fixed reset vs sliding) because the venue
//!   documentation is ambiguous; fixed is the default.
//! - **History** pool: a token bucket of 100 tokens replenished
//!   continuously over 600 seconds.
//!
//! Reservations are atomic and cancel-safe: a caller cancelled while
//! waiting has charged nothing, and dropping an uncommitted
//! `Reservation` releases its budget.

use crate::error::{RestError, RestResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Request budget pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    /// Derivatives cost pool (order management, account reads).
    Derivatives,
    /// History token bucket (paged history endpoints).
    History,
}

impl Pool {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Derivatives => "derivatives",
            Self::History => "history",
        }
    }
}

/// Cost-pool accounting policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// Consumption resets to zero at each window boundary.
    Fixed,
    /// Consumption is the sum of charges within the trailing window.
    Sliding,
}

/// Caller policy when a reservation would exceed the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservePolicy {
    /// Suspend until enough budget accrues (order-management default).
    Block,
    /// Fail immediately with `RestError::RateLimited` (best-effort polling).
    FailFast,
}

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Derivatives pool capacity in cost units.
    pub cost_capacity: u32,
    /// Derivatives pool window.
    pub cost_window: Duration,
    /// Derivatives pool accounting policy.
    pub window_policy: WindowPolicy,
    /// History bucket capacity in tokens.
    pub token_capacity: u32,
    /// Time to replenish the history bucket from empty to full.
    pub token_refill_period: Duration,
    /// Poll interval for blocked reservations.
    pub poll_interval: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            cost_capacity: 500,
            cost_window: Duration::from_secs(10),
            window_policy: WindowPolicy::Fixed,
            token_capacity: 100,
            token_refill_period: Duration::from_secs(600),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Reservation rejected: granting `cost` would overdraw the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WouldExceed {
    pub pool: &'static str,
    pub cost: u32,
    pub available: u32,
}

impl From<WouldExceed> for RestError {
    fn from(w: WouldExceed) -> Self {
        RestError::RateLimited {
            pool: w.pool,
            cost: w.cost,
            available: w.available,
        }
    }
}

struct SlidingEntry {
    at: Instant,
    cost: u32,
    id: u64,
}

struct CostPoolState {
    window_start: Instant,
    /// Window generation; a reservation released after rollover must not
    /// credit the new window.
    epoch: u64,
    consumed: u32,
    entries: VecDeque<SlidingEntry>,
    next_entry_id: u64,
}

struct TokenBucketState {
    tokens: f64,
    last_refill: Instant,
}

enum ReleaseToken {
    FixedWindow { epoch: u64 },
    Sliding { id: u64 },
    Bucket,
}

struct Inner {
    config: LimiterConfig,
    cost_pool: Mutex<CostPoolState>,
    token_pool: Mutex<TokenBucketState>,
}

/// Dual-pool rate limiter.
///
/// One instance per process, explicitly constructed and injected into
/// every caller; cheap to clone (shared internals).
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        let now = Instant::now();
        Self {
            inner: Arc::new(Inner {
                cost_pool: Mutex::new(CostPoolState {
                    window_start: now,
                    epoch: 0,
                    consumed: 0,
                    entries: VecDeque::new(),
                    next_entry_id: 0,
                }),
                token_pool: Mutex::new(TokenBucketState {
                    tokens: config.token_capacity as f64,
                    last_refill: now,
                }),
                config,
            }),
        }
    }

    /// Attempt an atomic reservation.
    ///
    /// On success the returned `Reservation` holds the budget; commit it
    /// once the request is actually sent, or drop it to release.
    pub fn try_reserve(&self, pool: Pool, cost: u32) -> Result<Reservation, WouldExceed> {
        let token = match pool {
            Pool::Derivatives => self.try_reserve_cost(cost)?,
            Pool::History => self.try_reserve_tokens(cost)?,
        };
        Ok(Reservation {
            limiter: self.clone(),
            pool,
            cost,
            token: Some(token),
        })
    }

    /// Reserve, suspending the caller until enough budget accrues.
    ///
    /// Cancel-safe: budget is only taken at the successful attempt, so a
    /// caller dropped while waiting has charged nothing. Fails fast only
    /// when `cost` can never be granted.
    pub async fn reserve(&self, pool: Pool, cost: u32) -> RestResult<Reservation> {
        let capacity = match pool {
            Pool::Derivatives => self.inner.config.cost_capacity,
            Pool::History => self.inner.config.token_capacity,
        };
        if cost > capacity {
            return Err(RestError::RateLimited {
                pool: pool.name(),
                cost,
                available: capacity,
            });
        }

        loop {
            match self.try_reserve(pool, cost) {
                Ok(reservation) => return Ok(reservation),
                Err(exceeded) => {
                    warn!(
                        pool = exceeded.pool,
                        cost = exceeded.cost,
                        available = exceeded.available,
                        "Budget exhausted, waiting"
                    );
                    tokio::time::sleep(self.inner.config.poll_interval).await;
                }
            }
        }
    }

    /// Reserve according to the caller's policy.
    pub async fn reserve_with_policy(
        &self,
        pool: Pool,
        cost: u32,
        policy: ReservePolicy,
    ) -> RestResult<Reservation> {
        match policy {
            ReservePolicy::Block => self.reserve(pool, cost).await,
            ReservePolicy::FailFast => self.try_reserve(pool, cost).map_err(RestError::from),
        }
    }

    /// Remaining budget in the pool.
    pub fn available(&self, pool: Pool) -> u32 {
        match pool {
            Pool::Derivatives => {
                let mut state = self.inner.cost_pool.lock();
                self.roll_cost_pool(&mut state);
                self.inner.config.cost_capacity.saturating_sub(state.consumed)
            }
            Pool::History => {
                let mut state = self.inner.token_pool.lock();
                self.refill_tokens(&mut state);
                state.tokens.floor() as u32
            }
        }
    }

    fn try_reserve_cost(&self, cost: u32) -> Result<ReleaseToken, WouldExceed> {
        let mut state = self.inner.cost_pool.lock();
        self.roll_cost_pool(&mut state);

        let available = self.inner.config.cost_capacity.saturating_sub(state.consumed);
        if cost > available {
            return Err(WouldExceed {
                pool: Pool::Derivatives.name(),
                cost,
                available,
            });
        }

        state.consumed += cost;
        match self.inner.config.window_policy {
            WindowPolicy::Fixed => Ok(ReleaseToken::FixedWindow { epoch: state.epoch }),
            WindowPolicy::Sliding => {
                let id = state.next_entry_id;
                state.next_entry_id += 1;
                state.entries.push_back(SlidingEntry {
                    at: Instant::now(),
                    cost,
                    id,
                });
                Ok(ReleaseToken::Sliding { id })
            }
        }
    }

    fn try_reserve_tokens(&self, cost: u32) -> Result<ReleaseToken, WouldExceed> {
        let mut state = self.inner.token_pool.lock();
        self.refill_tokens(&mut state);

        let cost_f = cost as f64;
        if cost_f > state.tokens {
            return Err(WouldExceed {
                pool: Pool::History.name(),
                cost,
                available: state.tokens.floor() as u32,
            });
        }

        state.tokens -= cost_f;
        Ok(ReleaseToken::Bucket)
    }

    /// Advance the cost pool to the current window / trailing horizon.
    fn roll_cost_pool(&self, state: &mut CostPoolState) {
        let now = Instant::now();
        match self.inner.config.window_policy {
            WindowPolicy::Fixed => {
                let window = self.inner.config.cost_window;
                while now.duration_since(state.window_start) >= window {
                    state.window_start += window;
                    state.epoch += 1;
                    state.consumed = 0;
                }
            }
            WindowPolicy::Sliding => {
                let cutoff = now - self.inner.config.cost_window;
                while state.entries.front().is_some_and(|e| e.at < cutoff) {
                    if let Some(expired) = state.entries.pop_front() {
                        state.consumed = state.consumed.saturating_sub(expired.cost);
                    }
                }
            }
        }
    }

    /// Continuous replenishment, never exceeding capacity.
    fn refill_tokens(&self, state: &mut TokenBucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        state.last_refill = now;

        let capacity = self.inner.config.token_capacity as f64;
        let rate = capacity / self.inner.config.token_refill_period.as_secs_f64();
        state.tokens = (state.tokens + elapsed.as_secs_f64() * rate).min(capacity);
    }

    fn release(&self, pool: Pool, cost: u32, token: ReleaseToken) {
        match (pool, token) {
            (Pool::Derivatives, ReleaseToken::FixedWindow { epoch }) => {
                let mut state = self.inner.cost_pool.lock();
                self.roll_cost_pool(&mut state);
                // A release after rollover must not credit the new window.
                if state.epoch == epoch {
                    state.consumed = state.consumed.saturating_sub(cost);
                }
            }
            (Pool::Derivatives, ReleaseToken::Sliding { id }) => {
                let mut state = self.inner.cost_pool.lock();
                if let Some(pos) = state.entries.iter().position(|e| e.id == id) {
                    if let Some(entry) = state.entries.remove(pos) {
                        state.consumed = state.consumed.saturating_sub(entry.cost);
                    }
                }
            }
            (Pool::History, ReleaseToken::Bucket) => {
                let mut state = self.inner.token_pool.lock();
                self.refill_tokens(&mut state);
                let capacity = self.inner.config.token_capacity as f64;
                state.tokens = (state.tokens + cost as f64).min(capacity);
            }
            _ => {}
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}

/// A granted budget reservation.
///
/// Call `commit()` once the request is dispatched; dropping an
/// uncommitted reservation returns the budget to its pool.
pub struct Reservation {
    limiter: RateLimiter,
    pool: Pool,
    cost: u32,
    token: Option<ReleaseToken>,
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("pool", &self.pool)
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}

impl Reservation {
    pub fn pool(&self) -> Pool {
        self.pool
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Consume the reservation; the budget stays charged.
    pub fn commit(mut self) {
        self.token = None;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.limiter.release(self.pool, self.cost, token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(policy: WindowPolicy) -> RateLimiter {
        RateLimiter::new(LimiterConfig {
            cost_capacity: 500,
            cost_window: Duration::from_secs(10),
            window_policy: policy,
            ..LimiterConfig::default()
        })
    }

    #[test]
    fn test_cost_pool_never_overdrawn() {
        let limiter = limiter(WindowPolicy::Fixed);
        let mut granted = 0u32;

        for _ in 0..100 {
            if let Ok(r) = limiter.try_reserve(Pool::Derivatives, 10) {
                granted += 10;
                r.commit();
            }
        }

        assert_eq!(granted, 500);
        assert_eq!(limiter.available(Pool::Derivatives), 0);
        assert!(limiter.try_reserve(Pool::Derivatives, 1).is_err());
    }

    #[test]
    fn test_concurrent_reservations_atomic() {
        let limiter = limiter(WindowPolicy::Fixed);
        let mut handles = Vec::new();

        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(std::thread::spawn(move || {
                let mut granted = 0u32;
                for _ in 0..50 {
                    if let Ok(r) = limiter.try_reserve(Pool::Derivatives, 10) {
                        granted += 10;
                        r.commit();
                    }
                }
                granted
            }));
        }

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 500);
    }

    #[test]
    fn test_drop_without_commit_releases() {
        let limiter = limiter(WindowPolicy::Fixed);

        {
            let _reservation = limiter.try_reserve(Pool::Derivatives, 100).unwrap();
            assert_eq!(limiter.available(Pool::Derivatives), 400);
        }

        assert_eq!(limiter.available(Pool::Derivatives), 500);
    }

    #[test]
    fn test_sliding_drop_releases() {
        let limiter = limiter(WindowPolicy::Sliding);

        let r1 = limiter.try_reserve(Pool::Derivatives, 200).unwrap();
        let r2 = limiter.try_reserve(Pool::Derivatives, 200).unwrap();
        assert_eq!(limiter.available(Pool::Derivatives), 100);

        drop(r1);
        assert_eq!(limiter.available(Pool::Derivatives), 300);
        r2.commit();
        assert_eq!(limiter.available(Pool::Derivatives), 300);
    }

    #[test]
    fn test_fixed_window_rollover_resets() {
        let limiter = RateLimiter::new(LimiterConfig {
            cost_capacity: 100,
            cost_window: Duration::from_millis(50),
            window_policy: WindowPolicy::Fixed,
            ..LimiterConfig::default()
        });

        limiter.try_reserve(Pool::Derivatives, 100).unwrap().commit();
        assert_eq!(limiter.available(Pool::Derivatives), 0);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(limiter.available(Pool::Derivatives), 100);
    }

    #[test]
    fn test_release_after_rollover_does_not_credit_new_window() {
        let limiter = RateLimiter::new(LimiterConfig {
            cost_capacity: 100,
            cost_window: Duration::from_millis(50),
            window_policy: WindowPolicy::Fixed,
            ..LimiterConfig::default()
        });

        let reservation = limiter.try_reserve(Pool::Derivatives, 80).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        // New window has rolled; the stale release must be a no-op.
        drop(reservation);
        assert_eq!(limiter.available(Pool::Derivatives), 100);
    }

    #[test]
    fn test_token_bucket_refills_and_caps() {
        let limiter = RateLimiter::new(LimiterConfig {
            token_capacity: 10,
            token_refill_period: Duration::from_millis(100),
            ..LimiterConfig::default()
        });

        limiter.try_reserve(Pool::History, 10).unwrap().commit();
        assert_eq!(limiter.available(Pool::History), 0);
        assert!(limiter.try_reserve(Pool::History, 1).is_err());

        // Full refill period elapsed: converges to capacity, never beyond.
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(limiter.available(Pool::History), 10);
    }

    #[test]
    fn test_token_release_caps_at_capacity() {
        let limiter = RateLimiter::new(LimiterConfig {
            token_capacity: 10,
            token_refill_period: Duration::from_millis(100),
            ..LimiterConfig::default()
        });

        let reservation = limiter.try_reserve(Pool::History, 5).unwrap();
        std::thread::sleep(Duration::from_millis(120));
        drop(reservation);
        assert_eq!(limiter.available(Pool::History), 10);
    }

    #[tokio::test]
    async fn test_blocking_reserve_waits_for_budget() {
        let limiter = RateLimiter::new(LimiterConfig {
            cost_capacity: 10,
            cost_window: Duration::from_millis(50),
            window_policy: WindowPolicy::Fixed,
            poll_interval: Duration::from_millis(5),
            ..LimiterConfig::default()
        });

        limiter.try_reserve(Pool::Derivatives, 10).unwrap().commit();

        let start = Instant::now();
        let reservation = limiter.reserve(Pool::Derivatives, 10).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        reservation.commit();
    }

    #[test]
    fn test_reservation_debug_omits_limiter_state() {
        let limiter = limiter(WindowPolicy::Fixed);
        let reservation = limiter.try_reserve(Pool::Derivatives, 10).unwrap();
        let rendered = format!("{reservation:?}");
        assert!(rendered.contains("Derivatives"));
        assert!(rendered.contains("10"));
    }

    #[tokio::test]
    async fn test_impossible_cost_fails_fast() {
        let limiter = RateLimiter::default();
        let err = limiter.reserve(Pool::Derivatives, 501).await.unwrap_err();
        assert!(matches!(err, RestError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_fail_fast_policy() {
        let limiter = limiter(WindowPolicy::Fixed);
        limiter.try_reserve(Pool::Derivatives, 500).unwrap().commit();

        let err = limiter
            .reserve_with_policy(Pool::Derivatives, 10, ReservePolicy::FailFast)
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::RateLimited { .. }));
    }
}
