use chrono::Utc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{LockKey, Shared};
use crate::domain::models::ViewerSession;
use crate::error::Result;
use crate::metrics;

/// Who is watching which stream
pub struct ViewerRegistry {
    shared: Shared,
}

impl ViewerRegistry {
    pub(crate) fn new(shared: Shared) -> Self {
        Self { shared }
    }

    /// Open a session, or return the one already active for this user.
    #[instrument(skip(self))]
    pub async fn join(&self, stream_id: Uuid, user_id: Uuid) -> Result<ViewerSession> {
        let shared = &self.shared;
        let join = shared
            .contended("viewer.join", move || async move {
                let _guard = shared.locks.acquire(LockKey::viewer(stream_id, user_id)).await?;
                shared.store.open_session(stream_id, user_id, Utc::now()).await
            })
            .await?;

        if join.created {
            metrics::viewer_joined();
            debug!(
                session_id = %join.session.id,
                viewers = join.current_viewer_count,
                "Viewer joined"
            );
        }
        Ok(join.session)
    }

    /// Close the user's active session. Returns `None` when there was none.
    #[instrument(skip(self))]
    pub async fn leave(&self, stream_id: Uuid, user_id: Uuid) -> Result<Option<ViewerSession>> {
        let shared = &self.shared;
        let closed = shared
            .contended("viewer.leave", move || async move {
                let _guard = shared.locks.acquire(LockKey::viewer(stream_id, user_id)).await?;
                shared.store.close_session(stream_id, user_id, Utc::now()).await
            })
            .await?;

        if let Some(session) = &closed {
            metrics::viewers_left(1);
            debug!(session_id = %session.id, "Viewer left");
        }
        Ok(closed)
    }

    pub async fn active_count(&self, stream_id: Uuid) -> Result<i64> {
        self.shared.stream(stream_id).await?;
        self.shared.store.count_active_sessions(stream_id).await
    }

    pub async fn active_viewers(&self, stream_id: Uuid) -> Result<Vec<ViewerSession>> {
        self.shared.stream(stream_id).await?;
        self.shared.store.active_sessions(stream_id).await
    }

    /// Close every active session on the stream.
    #[instrument(skip(self))]
    pub async fn close_all(&self, stream_id: Uuid) -> Result<u64> {
        let shared = &self.shared;
        let closed = shared
            .contended("viewer.close_all", move || async move {
                shared.store.close_all_sessions(stream_id, Utc::now()).await
            })
            .await?;

        metrics::viewers_left(closed);
        debug!(closed, "Closed all viewer sessions");
        Ok(closed)
    }
}
