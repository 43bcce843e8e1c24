//! Errors raised by Canvas API calls

use std::time::Duration;

use thiserror::Error;

use super::resilience::RetryableError;

/// Canvas answers throttled requests with 403 and this body text
const RATE_LIMIT_MARKER: &str = "Rate Limit Exceeded";

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{method} {url} returned HTTP {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    #[error("{method} {url} failed: {message}")]
    Transport {
        method: String,
        url: String,
        message: String,
    },

    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("invalid API client setup: {0}")]
    Setup(String),
}

impl ApiError {
    /// Build a status error
    pub fn status(method: &str, url: &str, status: u16, body: &str) -> Self {
        ApiError::Status {
            method: method.to_string(),
            url: url.to_string(),
            status,
            body: body.to_string(),
            retry_after: None,
        }
    }

    pub fn transport(method: &str, url: &str, error: &reqwest::Error) -> Self {
        let message = if error.is_timeout() {
            format!("timed out: {}", error)
        } else {
            error.to_string()
        };
        ApiError::Transport {
            method: method.to_string(),
            url: url.to_string(),
            message,
        }
    }

    /// Attach the server's `Retry-After` delay to a status error
    pub fn with_retry_after(mut self, delay: Option<Duration>) -> Self {
        if let ApiError::Status { retry_after, .. } = &mut self {
            *retry_after = delay;
        }
        self
    }

    /// Canvas signals throttling either with 429 or with a 403 carrying a marker body
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ApiError::Status { status, body, .. } => {
                *status == 429 || (*status == 403 && body.contains(RATE_LIMIT_MARKER))
            }
            _ => false,
        }
    }
}

impl RetryableError for ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => *status >= 500 || self.is_rate_limited(),
            ApiError::Transport { .. } => true,
            // Canvas occasionally truncates bodies under load
            ApiError::Decode { .. } => true,
            ApiError::Setup(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
