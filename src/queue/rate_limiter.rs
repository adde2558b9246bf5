//! Token-bucket rate limiting in front of the Provider Client, so a burst of
//! dispatcher workers can't collectively exceed the provider's contracted
//! send rate.

use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;

#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    /// Blocks (by sleeping) until a token is available, then consumes one.
    async fn acquire(&self);
}

struct BucketState {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

/// Classic token bucket: refills continuously at `rate_per_second`, holds at
/// most `burst` tokens. A send consumes exactly one token.
pub struct TokenBucketRateLimiter {
    rate_per_second: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucketRateLimiter {
    pub fn new(
        rate_per_second: f64,
        burst: f64,
    ) -> Self {
        Self {
            rate_per_second,
            burst,
            state: Mutex::new(BucketState { tokens: burst, last_refill: Utc::now() }),
        }
    }

    pub fn rate_per_second(&self) -> f64 { self.rate_per_second }

    /// Returns the wait, if any, needed before a token would be available,
    /// and reserves it optimistically so concurrent callers don't all wait
    /// for the same token.
    fn try_acquire(&self) -> Option<std::time::Duration> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let elapsed = (now - state.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        state.tokens = (state.tokens + elapsed * self.rate_per_second).min(self.burst);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - state.tokens;
            state.tokens -= 1.0; // reserve, goes negative, repaid by the next refill
            Some(std::time::Duration::from_secs_f64(deficit / self.rate_per_second))
        }
    }
}

#[async_trait::async_trait]
impl RateLimiter for TokenBucketRateLimiter {
    async fn acquire(&self) {
        if let Some(wait) = self.try_acquire() {
            tokio::time::sleep(wait).await;
        }
    }
}
