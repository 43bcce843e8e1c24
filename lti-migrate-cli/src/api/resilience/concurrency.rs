//! Concurrency limiter implementation
//!
//! Semaphore capping the number of Canvas requests in flight at once,
//! independent of how many courses the worker pool is processing.

use super::config::ConcurrencyConfig;
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Upper bound used when limiting is disabled (Tokio Semaphore max is 2^61-1)
const UNLIMITED_PERMITS: usize = 1_000_000;

#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    config: ConcurrencyConfig,
    requests_acquired: Arc<AtomicU64>,
    requests_waited: Arc<AtomicU64>,
}

impl ConcurrencyLimiter {
    pub fn new(config: ConcurrencyConfig) -> Self {
        let permits = if config.enabled {
            config.max_concurrent_requests.max(1)
        } else {
            UNLIMITED_PERMITS
        };

        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
            requests_acquired: Arc::new(AtomicU64::new(0)),
            requests_waited: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wait for a request slot. The permit releases the slot when dropped.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        if self.config.enabled && self.semaphore.available_permits() == 0 {
            self.requests_waited.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Concurrency limiter: waiting for permit ({} in use)",
                self.config.max_concurrent_requests
            );
        }

        // The semaphore is owned here and never closed
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("request semaphore closed");
        self.requests_acquired.fetch_add(1, Ordering::Relaxed);
        permit
    }

    #[cfg(test)]
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        self.requests_acquired.fetch_add(1, Ordering::Relaxed);
        Some(permit)
    }

    pub fn stats(&self) -> ConcurrencyStats {
        ConcurrencyStats {
            requests_acquired: self.requests_acquired.load(Ordering::Relaxed),
            requests_waited: self.requests_waited.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConcurrencyStats {
    pub requests_acquired: u64,
    pub requests_waited: u64,
}

impl ConcurrencyStats {
    /// Share of requests that had to wait for a slot
    pub fn wait_rate(&self) -> f64 {
        if self.requests_acquired == 0 {
            0.0
        } else {
            self.requests_waited as f64 / self.requests_acquired as f64
        }
    }
}
