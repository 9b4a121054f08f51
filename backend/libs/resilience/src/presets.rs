/// Preset configurations for common contention profiles
use crate::retry::RetryConfig;
use crate::timeout::TimeoutConfig;
use std::time::Duration;

/// Wait and retry budget for one class of operation
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub timeout: TimeoutConfig,
    pub retry: RetryConfig,
}

/// Short critical sections guarded by in-process or row locks
///
/// - Wait: 2s per lock acquisition
/// - Retry: 3 attempts total, 50ms -> 500ms backoff
pub fn lock_contention_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(2),
        },
        retry: RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter: true,
        },
    }
}

/// Connection setup and other one-off database calls
///
/// - Timeout: 10s
/// - Retry: 2 attempts total; the caller's predicate decides what is
///   retried (`with_retry` retries every error)
pub fn database_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(10),
        },
        retry: RetryConfig {
            max_retries: 1,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: true,
        },
    }
}
