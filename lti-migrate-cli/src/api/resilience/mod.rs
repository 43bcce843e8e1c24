//! Resilience features for Canvas API calls
//!
//! Retry policies, a shared token-bucket rate limiter and a request
//! concurrency limiter.

pub mod concurrency;
pub mod config;
pub mod rate_limiter;
pub mod retry;

pub use concurrency::ConcurrencyLimiter;
pub use config::ResilienceConfig;
pub use rate_limiter::RateLimiter;
pub use retry::{RetryPolicy, RetryableError};
