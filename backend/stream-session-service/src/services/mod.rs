pub mod cameras;
pub mod chat;
pub mod coordinator;
pub mod locks;
pub mod reactions;
pub mod viewers;

pub use cameras::CameraSwitchboard;
pub use chat::ChatLog;
pub use coordinator::StreamSessionCoordinator;
pub use locks::{LockGuard, LockKey, LockRegistry};
pub use reactions::ReactionLedger;
pub use viewers::ViewerRegistry;

use resilience::{with_retry_if, RetryConfig, RetryError};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;
use uuid::Uuid;

use crate::domain::models::Stream;
use crate::error::{Result, SessionError};
use crate::metrics;
use crate::repository::SessionStore;

/// Store, locks and retry budget shared by every component
#[derive(Clone)]
pub(crate) struct Shared {
    pub store: Arc<dyn SessionStore>,
    pub locks: Arc<LockRegistry>,
    pub retry: RetryConfig,
}

impl Shared {
    /// Run `attempt` until it stops losing races. Conflicts left over after
    /// the last attempt surface as `Busy`; other errors return immediately.
    pub async fn contended<T, F, Fut>(&self, operation: &'static str, attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = match with_retry_if(&self.retry, SessionError::is_retryable, attempt).await {
            Ok(value) => Ok(value),
            Err(RetryError::Permanent(e)) => Err(e),
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(operation, attempts, error = %last, "Operation busy after lock contention");
                metrics::record_busy(operation);
                Err(SessionError::Busy(format!(
                    "{} still contended after {} attempts",
                    operation, attempts
                )))
            }
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.error_code(),
        };
        metrics::observe_operation(operation, outcome, started.elapsed());
        result
    }

    pub async fn stream(&self, stream_id: Uuid) -> Result<Stream> {
        self.store
            .get_stream(stream_id)
            .await?
            .ok_or(SessionError::StreamNotFound(stream_id))
    }
}
