//! Retry decisions.
//!
//! # Design Decisions
//! - Never retry POST/PATCH (non-idempotent)
//! - Connection errors and timeouts are retryable; of the 5xx codes only
//!   502, 503 and 504 are

use std::time::Duration;

use axum::http::{Method, StatusCode};

use crate::resilience::backoff::calculate_backoff;

/// Bounded retries with jittered exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Total attempts allowed for `method`.
    pub fn max_attempts(&self, method: &Method) -> u32 {
        if method.is_idempotent() {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Delay before the retry following attempt number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay, self.max_delay)
    }
}

/// Whether an attempt that ended with `status` (or a transport error when
/// `network_error` is set) may be repeated.
pub fn is_retryable(method: &Method, status: Option<StatusCode>, network_error: bool) -> bool {
    if !method.is_idempotent() {
        return false;
    }
    if network_error {
        return true;
    }
    matches!(
        status,
        Some(StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_methods_only() {
        assert!(is_retryable(&Method::GET, None, true));
        assert!(is_retryable(&Method::PUT, Some(StatusCode::BAD_GATEWAY), false));
        assert!(!is_retryable(&Method::POST, None, true));
        assert!(!is_retryable(&Method::GET, Some(StatusCode::INTERNAL_SERVER_ERROR), false));
        assert!(!is_retryable(&Method::GET, Some(StatusCode::OK), false));
    }

    #[test]
    fn attempts_per_method() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.max_attempts(&Method::GET), 3);
        assert_eq!(policy.max_attempts(&Method::POST), 1);
    }
}
