//! Token-bucket rate limiting for outbound resolver queries.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A continuously refilling token bucket.
///
/// Each resolver owns one bucket; every task issuing queries through that
/// resolver calls [`TokenBucket::acquire`] first. The bucket state lives
/// behind a single async mutex and is never exposed directly.
///
/// # Examples
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use cidrsift::TokenBucket;
///
/// let bucket = TokenBucket::new(10.0);
/// bucket.acquire().await;
/// # }
/// ```
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant, rate: f64, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }
}

impl TokenBucket {
    /// Create a bucket refilling at `rate_per_second`, holding at most that
    /// many tokens. The bucket starts full.
    pub fn new(rate_per_second: f64) -> Self {
        Self::with_capacity(rate_per_second, rate_per_second)
    }

    /// Create a bucket with an explicit burst capacity.
    ///
    /// `rate_per_second` must be positive; capacity is raised to at least one
    /// token so that `acquire` can always complete.
    pub fn with_capacity(rate_per_second: f64, capacity: f64) -> Self {
        debug_assert!(rate_per_second > 0.0 && rate_per_second.is_finite());
        let capacity = capacity.max(1.0);
        Self {
            rate: rate_per_second,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Wait until a token is available, then take it.
    ///
    /// The lock is held while waiting, so waiters are served one at a time in
    /// lock order and a later caller cannot steal a token that an earlier
    /// caller is sleeping for.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        loop {
            state.refill(Instant::now(), self.rate, self.capacity);
            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return;
            }
            let wait = (1.0 - state.tokens) / self.rate;
            let wait = Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX);
            tokio::time::sleep(wait).await;
        }
    }
}
