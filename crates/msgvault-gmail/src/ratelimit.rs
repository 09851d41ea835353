//! Weighted token-bucket rate limiter with adaptive throttling.
//!
//! Gmail enforces a per-user quota measured in operation units rather than
//! requests, so each [`Operation`] carries a fixed cost. On quota pushback
//! the bucket drains, the refill rate halves, and a throttle window opens;
//! the window never shrinks, and the rate recovers once it expires.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::time::{Clock, SystemClock};

/// Default bucket capacity in quota units.
pub const DEFAULT_CAPACITY: f64 = 250.0;

/// Default refill rate in quota units per second (at [`DEFAULT_QPS`]).
pub const DEFAULT_REFILL_RATE: f64 = 250.0;

/// The QPS the default refill rate corresponds to.
pub const DEFAULT_QPS: f64 = 5.0;

/// Lowest QPS the limiter will run at, including after throttle halving.
pub const MIN_QPS: f64 = 0.5;

/// How often a blocked `acquire` rechecks the bucket.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Gmail API operations with their quota costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `users.getProfile`.
    Profile,
    /// `users.labels.list`.
    LabelsList,
    /// `users.messages.list`.
    MessagesList,
    /// `users.messages.get`.
    MessagesGet,
    /// `users.messages.get` with `format=raw`.
    MessagesGetRaw,
    /// `users.history.list`.
    HistoryList,
    /// `users.messages.trash`.
    MessagesTrash,
    /// `users.messages.delete`.
    MessagesDelete,
    /// `users.messages.batchDelete`.
    MessagesBatchDelete,
}

impl Operation {
    /// Returns the quota cost of this operation.
    #[must_use]
    pub const fn cost(self) -> f64 {
        match self {
            Self::Profile | Self::LabelsList => 1.0,
            Self::HistoryList => 2.0,
            Self::MessagesGet | Self::MessagesGetRaw | Self::MessagesList | Self::MessagesTrash => {
                5.0
            }
            Self::MessagesDelete => 10.0,
            Self::MessagesBatchDelete => 50.0,
        }
    }
}

#[derive(Debug)]
struct State {
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
    throttled_until: Option<Instant>,
}

/// Thread-safe weighted token bucket.
pub struct RateLimiter<C: Clock = SystemClock> {
    capacity: f64,
    /// Refill rate restored after a throttle window expires.
    base_refill: f64,
    min_refill: f64,
    state: Mutex<State>,
    clock: C,
}

impl RateLimiter<SystemClock> {
    /// Creates a limiter sized for the given queries-per-second budget.
    ///
    /// The refill rate scales linearly below [`DEFAULT_QPS`] and is capped
    /// at the default above it.
    #[must_use]
    pub fn new(qps: f64) -> Self {
        Self::with_clock(qps, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Creates a limiter with an explicit clock (used by tests).
    #[must_use]
    pub fn with_clock(qps: f64, clock: C) -> Self {
        let qps = qps.clamp(MIN_QPS, DEFAULT_QPS);
        let base_refill = DEFAULT_REFILL_RATE * qps / DEFAULT_QPS;
        let now = clock.now();
        Self {
            capacity: DEFAULT_CAPACITY,
            base_refill,
            min_refill: DEFAULT_REFILL_RATE * MIN_QPS / DEFAULT_QPS,
            state: Mutex::new(State {
                tokens: DEFAULT_CAPACITY,
                refill_rate: base_refill,
                last_refill: now,
                throttled_until: None,
            }),
            clock,
        }
    }

    /// Attempts to consume tokens for the operation without blocking.
    #[must_use]
    pub fn try_acquire(&self, op: Operation) -> bool {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        self.refill(&mut state);

        if state.throttled_until.is_some() {
            return false;
        }

        let cost = op.cost();
        if state.tokens >= cost {
            state.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Blocks until the operation's tokens are available and no throttle is
    /// active, or the token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when `cancel` fires first.
    pub async fn acquire(&self, op: Operation, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if self.try_acquire(op) {
                return Ok(());
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    /// Forces zero availability for at least `duration` and halves the
    /// refill rate (floored at the minimum QPS).
    ///
    /// An existing throttle window is never shortened; a new call only
    /// extends it when `now + duration` reaches further out.
    pub fn throttle(&self, duration: Duration) {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        let until = self.clock.now() + duration;

        state.tokens = 0.0;
        state.refill_rate = (state.refill_rate * 0.5).max(self.min_refill);
        state.throttled_until = Some(match state.throttled_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    /// Restores the configured refill rate.
    ///
    /// Called automatically when a refill observes that the throttle
    /// window has expired.
    pub fn recover_rate(&self) {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        state.refill_rate = self.base_refill;
    }

    /// Returns the tokens currently available.
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        self.refill(&mut state);
        state.tokens
    }

    /// Returns the current refill rate (observable for tests and stats).
    #[must_use]
    pub fn refill_rate(&self) -> f64 {
        self.state
            .lock()
            .expect("rate limiter mutex poisoned")
            .refill_rate
    }

    /// Returns the end of the active throttle window, if any.
    #[must_use]
    pub fn throttled_until(&self) -> Option<Instant> {
        self.state
            .lock()
            .expect("rate limiter mutex poisoned")
            .throttled_until
    }

    /// Advances the bucket to `now`. No tokens accrue while throttled;
    /// when the window has expired the rate recovers and refill resumes.
    fn refill(&self, state: &mut State) {
        let now = self.clock.now();

        if let Some(until) = state.throttled_until {
            if now < until {
                state.last_refill = now;
                return;
            }
            state.throttled_until = None;
            state.refill_rate = self.base_refill;
        }

        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens =
            (state.tokens + elapsed.as_secs_f64() * state.refill_rate).min(self.capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::MockClock;
    use std::sync::Arc;

    fn test_limiter() -> RateLimiter<Arc<MockClock>> {
        RateLimiter::with_clock(DEFAULT_QPS, MockClock::shared())
    }

    fn drain(limiter: &RateLimiter<Arc<MockClock>>) {
        while limiter.try_acquire(Operation::MessagesBatchDelete) {}
        while limiter.try_acquire(Operation::MessagesGet) {}
        while limiter.try_acquire(Operation::Profile) {}
    }

    #[test]
    fn test_operation_costs() {
        assert_eq!(Operation::MessagesGet.cost(), 5.0);
        assert_eq!(Operation::MessagesGetRaw.cost(), 5.0);
        assert_eq!(Operation::MessagesList.cost(), 5.0);
        assert_eq!(Operation::LabelsList.cost(), 1.0);
        assert_eq!(Operation::HistoryList.cost(), 2.0);
        assert_eq!(Operation::MessagesTrash.cost(), 5.0);
        assert_eq!(Operation::MessagesDelete.cost(), 10.0);
        assert_eq!(Operation::MessagesBatchDelete.cost(), 50.0);
        assert_eq!(Operation::Profile.cost(), 1.0);
    }

    #[test]
    fn test_new_limiter_defaults() {
        let limiter = RateLimiter::new(5.0);
        assert_eq!(limiter.available(), DEFAULT_CAPACITY);
        assert_eq!(limiter.refill_rate(), DEFAULT_REFILL_RATE);
    }

    #[test]
    fn test_scaled_qps() {
        let limiter = RateLimiter::new(2.5);
        assert_eq!(limiter.refill_rate(), DEFAULT_REFILL_RATE * 0.5);

        // Above the default QPS the rate is capped, not increased.
        let limiter = RateLimiter::new(10.0);
        assert_eq!(limiter.refill_rate(), DEFAULT_REFILL_RATE);
    }

    #[test]
    fn test_try_acquire_and_drain() {
        let limiter = test_limiter();
        assert!(limiter.try_acquire(Operation::Profile));

        drain(&limiter);
        assert!(!limiter.try_acquire(Operation::MessagesBatchDelete));
    }

    #[test]
    fn test_refill_over_time() {
        let clock = MockClock::shared();
        let limiter = RateLimiter::with_clock(DEFAULT_QPS, Arc::clone(&clock));
        drain(&limiter);
        let before = limiter.available();

        clock.advance(Duration::from_millis(100));
        let after = limiter.available();
        assert!(after > before, "tokens should refill: {before} -> {after}");
    }

    #[test]
    fn test_available_never_exceeds_capacity() {
        let clock = MockClock::shared();
        let limiter = RateLimiter::with_clock(DEFAULT_QPS, Arc::clone(&clock));
        clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.available(), DEFAULT_CAPACITY);
    }

    #[test]
    fn test_throttle_zeroes_tokens() {
        let clock = MockClock::shared();
        let limiter = RateLimiter::with_clock(DEFAULT_QPS, Arc::clone(&clock));
        assert_eq!(limiter.available(), DEFAULT_CAPACITY);

        limiter.throttle(Duration::from_millis(100));
        assert_eq!(limiter.available(), 0.0);

        // Still throttled: nothing accrues.
        clock.advance(Duration::from_millis(30));
        assert_eq!(limiter.available(), 0.0);

        // Window expired: refill resumes.
        clock.advance(Duration::from_millis(100));
        assert!(limiter.available() > 0.0);
    }

    #[test]
    fn test_throttle_halves_rate_and_recover() {
        let limiter = test_limiter();
        limiter.throttle(Duration::from_millis(10));
        assert_eq!(limiter.refill_rate(), DEFAULT_REFILL_RATE * 0.5);

        limiter.recover_rate();
        assert_eq!(limiter.refill_rate(), DEFAULT_REFILL_RATE);
    }

    #[test]
    fn test_throttle_floor_at_min_qps() {
        let limiter = test_limiter();
        for _ in 0..16 {
            limiter.throttle(Duration::from_millis(10));
        }
        let floor = DEFAULT_REFILL_RATE * MIN_QPS / DEFAULT_QPS;
        assert_eq!(limiter.refill_rate(), floor);
    }

    #[test]
    fn test_throttle_never_shortens_backoff() {
        let limiter = test_limiter();
        limiter.throttle(Duration::from_millis(200));
        let first_end = limiter.throttled_until().unwrap();

        // A shorter throttle during backoff must not shorten the window.
        limiter.throttle(Duration::from_millis(50));
        let second_end = limiter.throttled_until().unwrap();
        assert!(second_end >= first_end);
    }

    #[test]
    fn test_throttle_extends_backoff() {
        let clock = MockClock::shared();
        let limiter = RateLimiter::with_clock(DEFAULT_QPS, Arc::clone(&clock));

        limiter.throttle(Duration::from_millis(50));
        let first_end = limiter.throttled_until().unwrap();

        clock.advance(Duration::from_millis(30));
        limiter.throttle(Duration::from_millis(50));
        let second_end = limiter.throttled_until().unwrap();
        assert!(second_end > first_end);
    }

    #[test]
    fn test_auto_recover_rate_after_expiry() {
        let clock = MockClock::shared();
        let limiter = RateLimiter::with_clock(DEFAULT_QPS, Arc::clone(&clock));

        limiter.throttle(Duration::from_millis(50));
        assert_eq!(limiter.refill_rate(), DEFAULT_REFILL_RATE * 0.5);

        clock.advance(Duration::from_millis(100));
        limiter.available(); // refill observes expiry
        assert_eq!(limiter.refill_rate(), DEFAULT_REFILL_RATE);
    }

    #[tokio::test]
    async fn test_acquire_fast_path() {
        let limiter = RateLimiter::new(5.0);
        let cancel = CancellationToken::new();
        limiter.acquire(Operation::Profile, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_acquire_cancelled() {
        let limiter = RateLimiter::new(MIN_QPS);
        while limiter.try_acquire(Operation::MessagesBatchDelete) {}
        while limiter.try_acquire(Operation::Profile) {}

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = limiter
            .acquire(Operation::MessagesBatchDelete, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_throttle() {
        let limiter = RateLimiter::new(5.0);
        let throttle = Duration::from_millis(100);
        limiter.throttle(throttle);

        let cancel = CancellationToken::new();
        let start = Instant::now();
        limiter.acquire(Operation::Profile, &cancel).await.unwrap();
        let elapsed = start.elapsed();
        assert!(
            elapsed >= throttle - Duration::from_millis(20),
            "acquire returned before throttle expired: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_acquire_concurrent() {
        let limiter = Arc::new(RateLimiter::new(5.0));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(Operation::Profile, &cancel).await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }
}
