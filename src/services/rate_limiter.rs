use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub requests: u32,
    pub window: Duration,
    /// Longest a caller will wait for a token
    pub max_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 60,
            window: Duration::from_secs(60),
            max_wait: Duration::from_secs(30),
        }
    }
}

/// The wait for a token exceeded `max_wait`; carries the wait that would have been needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limit wait of {0:?} exceeds the allowed maximum")]
pub struct WaitTooLong(pub Duration);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket refilled continuously at `requests / window`
///
/// Callers reserve a token up front, so concurrent waiters queue fairly
/// instead of racing for the same refill.
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: config.requests as f64,
                last_refill: Instant::now(),
            }),
            config,
        }
    }

    fn capacity(&self) -> f64 {
        self.config.requests.max(1) as f64
    }

    /// Reserve a token, returning how long to wait before using it
    pub fn reserve(&self) -> Result<Duration, WaitTooLong> {
        let capacity = self.capacity();
        let window = self.config.window.as_secs_f64();
        let mut bucket = self.bucket.lock();

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = if window > 0.0 {
            (bucket.tokens + elapsed * capacity / window).min(capacity)
        } else {
            capacity
        };
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(Duration::ZERO);
        }

        let wait = Duration::from_secs_f64((1.0 - bucket.tokens) * window / capacity);
        if wait > self.config.max_wait {
            return Err(WaitTooLong(wait));
        }
        // Goes negative: later callers see the debt and wait longer
        bucket.tokens -= 1.0;
        Ok(wait)
    }

    /// Wait for a token, at most `max_wait`
    pub async fn acquire(&self) -> Result<(), WaitTooLong> {
        let wait = self.reserve()?;
        if !wait.is_zero() {
            tracing::trace!(wait_ms = wait.as_millis() as u64, "Rate limiter delaying request");
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }
}
