use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::{
    CameraSwitchboard, ChatLog, LockKey, LockRegistry, ReactionLedger, Shared, ViewerRegistry,
};
use crate::config::CoordinatorConfig;
use crate::domain::models::{
    CounterRepair, DashboardSnapshot, NewStream, Stream, StreamEndSummary, StreamStatus,
    StreamTransition,
};
use crate::error::Result;
use crate::metrics;
use crate::repository::SessionStore;

#[derive(Debug, Validate)]
struct StreamInput {
    #[validate(length(min = 1, max = 200))]
    title: String,
}

/// Stream lifecycle plus the per-stream components behind the broadcast dashboard
pub struct StreamSessionCoordinator {
    shared: Shared,
    viewers: ViewerRegistry,
    chat: ChatLog,
    reactions: ReactionLedger,
    cameras: CameraSwitchboard,
}

impl StreamSessionCoordinator {
    pub fn new(store: Arc<dyn SessionStore>, config: &CoordinatorConfig) -> Self {
        let shared = Shared {
            store,
            locks: Arc::new(LockRegistry::new(config.lock_wait())),
            retry: config.retry(),
        };

        Self {
            viewers: ViewerRegistry::new(shared.clone()),
            chat: ChatLog::new(shared.clone(), config.chat_max_chars, config.history_limit),
            reactions: ReactionLedger::new(shared.clone()),
            cameras: CameraSwitchboard::new(shared.clone(), config.history_limit),
            shared,
        }
    }

    pub fn viewers(&self) -> &ViewerRegistry {
        &self.viewers
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn reactions(&self) -> &ReactionLedger {
        &self.reactions
    }

    pub fn cameras(&self) -> &CameraSwitchboard {
        &self.cameras
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.shared.locks
    }

    /// Create a stream in `upcoming`.
    #[instrument(skip(self, title))]
    pub async fn create_stream(&self, creator_id: Uuid, title: &str) -> Result<Stream> {
        let input = StreamInput {
            title: title.trim().to_string(),
        };
        input.validate()?;

        let new = &NewStream {
            creator_id,
            title: input.title,
        };
        let shared = &self.shared;
        let stream = shared
            .contended("stream.create", move || {
                let new = new.clone();
                async move { shared.store.create_stream(new, Utc::now()).await }
            })
            .await?;

        info!(stream_id = %stream.id, "Stream created");
        Ok(stream)
    }

    /// `upcoming -> live`. A stream may go live without cameras.
    #[instrument(skip(self))]
    pub async fn start(&self, stream_id: Uuid) -> Result<Stream> {
        let started = self
            .transition(stream_id, StreamStatus::Upcoming, StreamStatus::Live)
            .await?;
        info!("Stream live");
        Ok(started.stream)
    }

    /// `live -> ended`: close every viewer session and freeze the stream.
    ///
    /// The sessions close in the same store unit as the status change, so a
    /// failed stop leaves the stream live with its viewers and can be retried.
    #[instrument(skip(self))]
    pub async fn stop(&self, stream_id: Uuid) -> Result<StreamEndSummary> {
        let ended = self
            .transition(stream_id, StreamStatus::Live, StreamStatus::Ended)
            .await?;
        metrics::viewers_left(ended.sessions_closed);

        let StreamTransition {
            stream,
            sessions_closed,
        } = ended;
        let duration_seconds = match (stream.started_at, stream.ended_at) {
            (Some(started), Some(ended)) => (ended - started).num_seconds().max(0),
            _ => 0,
        };

        info!(sessions_closed, duration_seconds, peak = stream.peak_viewer_count, "Stream ended");
        Ok(StreamEndSummary {
            stream,
            sessions_closed,
            duration_seconds,
        })
    }

    async fn transition(
        &self,
        stream_id: Uuid,
        from: StreamStatus,
        to: StreamStatus,
    ) -> Result<StreamTransition> {
        let shared = &self.shared;
        let operation = match to {
            StreamStatus::Live => "stream.start",
            _ => "stream.stop",
        };
        shared
            .contended(operation, move || async move {
                let _guard = shared.locks.acquire(LockKey::Stream(stream_id)).await?;
                shared
                    .store
                    .transition_stream(stream_id, from, to, Utc::now())
                    .await
            })
            .await
    }

    pub async fn stream(&self, stream_id: Uuid) -> Result<Stream> {
        self.shared.stream(stream_id).await
    }

    /// Everything the dashboard renders in one poll.
    pub async fn snapshot(&self, stream_id: Uuid) -> Result<DashboardSnapshot> {
        let stream = self.shared.stream(stream_id).await?;
        let active_viewers = self.shared.store.count_active_sessions(stream_id).await?;
        let cameras = self.shared.store.list_cameras(stream_id).await?;
        let primary_camera_id = cameras.iter().find(|c| c.is_primary).map(|c| c.id);

        Ok(DashboardSnapshot {
            stream,
            active_viewers,
            cameras,
            primary_camera_id,
        })
    }

    /// Reconcile counters of every live stream, skipping streams that fail.
    pub async fn reconcile_live(&self) -> Result<Vec<CounterRepair>> {
        let live = self.shared.store.list_stream_ids(StreamStatus::Live).await?;
        let mut repairs = Vec::with_capacity(live.len());

        for stream_id in live {
            match self.reactions.reconcile(stream_id).await {
                Ok(repair) => repairs.push(repair),
                Err(e) => warn!(%stream_id, error = %e, "Counter reconciliation failed"),
            }
        }

        let viewers = repairs.iter().map(|r| r.after.current_viewer_count).sum();
        metrics::set_active_viewers(viewers);
        Ok(repairs)
    }
}
