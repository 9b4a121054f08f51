/// Bounded waits for async operations
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub duration: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TimeoutError {
    #[error("{what} did not complete within {after:?}")]
    Elapsed { what: &'static str, after: Duration },
}

/// Wait for `future` at most `duration`; `what` names the wait in the error.
pub async fn with_timeout<F, T>(
    what: &'static str,
    duration: Duration,
    future: F,
) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError::Elapsed {
            what,
            after: duration,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_in_time() {
        let value = with_timeout("answer", Duration::from_secs(1), async { 42 }).await;
        assert_eq!(value.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_elapsed_names_the_wait() {
        let result = with_timeout("slow lock", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().starts_with("slow lock"));
    }
}
