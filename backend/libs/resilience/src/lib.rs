/// Resilience patterns for contended operations
///
/// This library provides:
/// - **Retry**: Exponential backoff with jitter, with a predicate choosing which failures are transient
/// - **Timeout**: Bounded waits that surface as errors instead of hanging
/// - **Preset Configurations**: Pre-tuned budgets for lock contention and database work
///
/// # Example: Retrying a lock-guarded update
///
/// ```rust,no_run
/// use resilience::{presets, with_retry_if, with_timeout};
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::lock_contention_config();
///     let lock = tokio::sync::Mutex::new(0u32);
///     let (lock, wait) = (&lock, config.timeout.duration);
///
///     let result = with_retry_if(&config.retry, |_e: &String| true, move || async move {
///         let mut guard = with_timeout("counter lock", wait, lock.lock())
///             .await
///             .map_err(|e| e.to_string())?;
///         *guard += 1;
///         Ok::<_, String>(*guard)
///     })
///     .await;
///     assert!(result.is_ok());
/// }
/// ```

pub mod presets;
pub mod retry;
pub mod timeout;

pub use presets::{database_config, lock_contention_config, ServiceConfig};
pub use retry::{with_retry, with_retry_if, RetryConfig, RetryError};
pub use timeout::{with_timeout, TimeoutConfig, TimeoutError};
