//! Per-origin rate limiting
//!
//! Each origin gets a token bucket (capacity = burst size, refill =
//! requests/sec) and an optional minimum inter-request gap taken from the
//! robots.txt Crawl-delay. `acquire` suspends until both constraints are
//! satisfied, so the effective pacing is whichever is tighter.
//!
//! A token is only consumed at the moment the caller is released;
//! cancelling a pending `acquire` (dropping the future) consumes nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug)]
struct OriginBucket {
    tokens: f64,
    last_refill: Instant,
    last_fetch: Option<Instant>,
    min_gap: Duration,
}

impl OriginBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
            last_fetch: None,
            min_gap: Duration::ZERO,
        }
    }

    fn refill(&mut self, rate: f64, capacity: f64, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * rate).min(capacity);
            self.last_refill = now;
        }
    }

    /// Time until both a token and the inter-request gap are available;
    /// zero means a request may start now.
    fn wait_needed(&self, rate: f64, now: Instant) -> Duration {
        let token_wait = if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / rate)
        };

        let gap_wait = match self.last_fetch {
            Some(last) if !self.min_gap.is_zero() => {
                let since = now.duration_since(last);
                self.min_gap.saturating_sub(since)
            }
            _ => Duration::ZERO,
        };

        token_wait.max(gap_wait)
    }
}

/// Cooperative per-origin rate limiter
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    origins: StdMutex<HashMap<String, Arc<Mutex<OriginBucket>>>>,
}

impl RateLimiter {
    /// Creates a limiter refilling `requests_per_second` tokens per second
    /// with bucket capacity `burst` (defaults to the rate when None)
    pub fn new(requests_per_second: f64, burst: Option<u32>) -> Self {
        let capacity = burst
            .map(f64::from)
            .unwrap_or(requests_per_second)
            .max(1.0);
        Self {
            rate: requests_per_second,
            capacity,
            origins: StdMutex::new(HashMap::new()),
        }
    }

    fn bucket(&self, origin: &str) -> Arc<Mutex<OriginBucket>> {
        let mut origins = self.origins.lock().expect("rate limiter lock poisoned");
        Arc::clone(
            origins
                .entry(origin.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(OriginBucket::new(self.capacity)))),
        )
    }

    /// Records the effective Crawl-delay for an origin
    ///
    /// The caller caps the value; passing None clears the gap.
    pub async fn set_crawl_delay(&self, origin: &str, delay: Option<Duration>) {
        let bucket = self.bucket(origin);
        let mut bucket = bucket.lock().await;
        bucket.min_gap = delay.unwrap_or(Duration::ZERO);
    }

    /// Suspends until a request to the origin may start, then records the
    /// fetch start time
    pub async fn acquire(&self, origin: &str) {
        let bucket = self.bucket(origin);
        loop {
            let wait = {
                let mut bucket = bucket.lock().await;
                let now = Instant::now();
                bucket.refill(self.rate, self.capacity, now);
                let wait = bucket.wait_needed(self.rate, now);
                if wait.is_zero() {
                    bucket.tokens -= 1.0;
                    bucket.last_fetch = Some(now);
                    return;
                }
                wait
            };
            tokio::time::sleep(wait).await;
        }
    }
}
