//! Token bucket rate limiter shared by all Canvas calls
//!
//! Canvas throttles per access token, so every worker draws from the same
//! bucket. Clones share state.

use super::config::RateLimitConfig;
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, per_second: f64, capacity: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_second).min(capacity);
        self.last_refill = now;
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Arc<Mutex<Bucket>>,
    requests_allowed: Arc<AtomicU64>,
    requests_throttled: Arc<AtomicU64>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let capacity = config.burst_capacity.max(1) as f64;
        Self {
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
            config,
            requests_allowed: Arc::new(AtomicU64::new(0)),
            requests_throttled: Arc::new(AtomicU64::new(0)),
        }
    }

    fn per_second(&self) -> f64 {
        self.config.requests_per_minute.max(1) as f64 / 60.0
    }

    fn capacity(&self) -> f64 {
        self.config.burst_capacity.max(1) as f64
    }

    /// Wait until a token is available, then consume it
    pub async fn acquire(&self) {
        if !self.config.enabled {
            return;
        }

        let mut throttled = false;
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                bucket.refill(self.per_second(), self.capacity());
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - bucket.tokens) / self.per_second()))
                }
            };

            match wait {
                None => break,
                Some(delay) => {
                    if !throttled {
                        throttled = true;
                        self.requests_throttled.fetch_add(1, Ordering::Relaxed);
                    }
                    debug!("Rate limiter: waiting {:?} for a token", delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        self.requests_allowed.fetch_add(1, Ordering::Relaxed);
    }

    /// Consume a token if one is available right now
    #[cfg(test)]
    pub fn try_acquire(&self) -> bool {
        if !self.config.enabled {
            return true;
        }

        let Ok(mut bucket) = self.bucket.try_lock() else {
            return false;
        };
        bucket.refill(self.per_second(), self.capacity());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            self.requests_allowed.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            requests_allowed: self.requests_allowed.load(Ordering::Relaxed),
            requests_throttled: self.requests_throttled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub requests_allowed: u64,
    /// Requests that had to wait at least once
    pub requests_throttled: u64,
}
