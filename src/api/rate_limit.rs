//! Per-user insert rate limiting.
//!
//! Token bucket per user id, guarding `POST /queue` and `POST /catalog/bulk`.
//! Unconfigured (the default) the limiter admits everything.

use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::Mutex;

/// Simple token bucket
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    rate: f64,
    capacity: u32,
}

impl TokenBucket {
    fn new(rate: f64, capacity: u32) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: Instant::now(),
            rate,
            capacity,
        }
    }

    /// None = admitted; Some(wait) = denied with a retry hint in seconds
    fn try_consume(&mut self) -> Option<u64> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity as f64);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            Some(((1.0 - self.tokens) / self.rate).ceil() as u64)
        }
    }
}

/// Per-user insert rate limiter
pub struct InsertLimiter {
    buckets: Mutex<HashMap<i64, TokenBucket>>,
    rate_per_second: Option<f64>,
    burst: u32,
}

impl InsertLimiter {
    /// `requests_per_minute = None` disables limiting entirely
    pub fn new(requests_per_minute: Option<u32>, burst: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rate_per_second: requests_per_minute.map(|rpm| rpm as f64 / 60.0),
            burst: burst.max(1),
        }
    }

    /// None = admitted; Some(wait_seconds) = denied
    pub async fn check(&self, user_id: i64) -> Option<u64> {
        let rate = self.rate_per_second?;

        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(user_id)
            .or_insert_with(|| TokenBucket::new(rate, self.burst));
        bucket.try_consume()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_limiter_admits_everything() {
        let limiter = InsertLimiter::new(None, 10);
        for _ in 0..1000 {
            assert!(limiter.check(1).await.is_none());
        }
    }

    #[tokio::test]
    async fn burst_exhaustion_denies_with_a_wait_hint() {
        let limiter = InsertLimiter::new(Some(60), 3);

        for _ in 0..3 {
            assert!(limiter.check(1).await.is_none(), "the burst is admitted");
        }
        let wait = limiter.check(1).await;
        assert!(wait.is_some(), "the fourth immediate request is denied");
        assert!(wait.unwrap() >= 1);
    }

    #[tokio::test]
    async fn users_have_independent_buckets() {
        let limiter = InsertLimiter::new(Some(60), 1);

        assert!(limiter.check(1).await.is_none());
        assert!(limiter.check(1).await.is_some(), "user 1 exhausted");
        assert!(
            limiter.check(2).await.is_none(),
            "user 2 has a fresh bucket"
        );
    }
}
