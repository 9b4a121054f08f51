//! Storage seam for stream session state
//!
//! Every mutating method is one atomic unit: it re-checks the stream status and
//! the entity invariants inside its own critical section and either applies all
//! of its row and counter changes or none of them. Callers add per-entity
//! serialization and retries on top (see `services::locks`).

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::models::{
    Camera, CameraSwitchEvent, ChatMessage, CounterRepair, NewCamera, NewChatMessage, NewStream,
    ReactionKind, ReactionOutcome, SessionJoin, ShareEvent, Stream, StreamStatus, StreamTransition,
    SwitchOutcome, ViewerSession,
};
use crate::error::Result;

#[async_trait]
pub trait StreamRepository: Send + Sync {
    async fn create_stream(&self, new: NewStream, at: DateTime<Utc>) -> Result<Stream>;

    async fn get_stream(&self, stream_id: Uuid) -> Result<Option<Stream>>;

    /// Move `from -> to`, stamping `started_at`/`ended_at`. Moving to `ended`
    /// also closes every active session and zeroes the viewer count.
    /// Fails `InvalidTransition` when the stream is not currently in `from`.
    async fn transition_stream(
        &self,
        stream_id: Uuid,
        from: StreamStatus,
        to: StreamStatus,
        at: DateTime<Utc>,
    ) -> Result<StreamTransition>;

    async fn list_stream_ids(&self, status: StreamStatus) -> Result<Vec<Uuid>>;
}

#[async_trait]
pub trait ViewerRepository: Send + Sync {
    /// Return the active session for (stream, user) or open one. Requires a live stream.
    async fn open_session(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<SessionJoin>;

    /// Close the active session, if any.
    async fn close_session(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<ViewerSession>>;

    /// Close every active session and zero the cached viewer count.
    async fn close_all_sessions(&self, stream_id: Uuid, at: DateTime<Utc>) -> Result<u64>;

    async fn count_active_sessions(&self, stream_id: Uuid) -> Result<i64>;

    async fn active_sessions(&self, stream_id: Uuid) -> Result<Vec<ViewerSession>>;
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Append with the next sequence number. Fails `StreamEnded` after the stream ends.
    async fn append_message(&self, new: NewChatMessage, at: DateTime<Utc>)
        -> Result<ChatMessage>;

    async fn get_message(&self, message_id: Uuid) -> Result<Option<ChatMessage>>;

    /// Soft-delete; a message that is already deleted is returned unchanged.
    async fn soft_delete_message(
        &self,
        message_id: Uuid,
        deleted_by: Uuid,
        at: DateTime<Utc>,
    ) -> Result<ChatMessage>;

    /// Newest undeleted messages with `seq < before` (all when `None`),
    /// returned oldest first.
    async fn recent_messages(
        &self,
        stream_id: Uuid,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>>;
}

#[async_trait]
pub trait ReactionRepository: Send + Sync {
    /// Add, toggle off, or replace the user's reaction and move the counters with it.
    async fn apply_reaction(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        kind: ReactionKind,
        at: DateTime<Utc>,
    ) -> Result<ReactionOutcome>;

    async fn get_reaction(&self, stream_id: Uuid, user_id: Uuid) -> Result<Option<ReactionKind>>;

    async fn record_share(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        platform: &str,
        at: DateTime<Utc>,
    ) -> Result<ShareEvent>;

    /// Recompute cached counters from reaction, share and session rows.
    async fn recount(&self, stream_id: Uuid) -> Result<CounterRepair>;
}

#[async_trait]
pub trait CameraRepository: Send + Sync {
    /// Insert a connected camera; it becomes primary when the stream has none.
    async fn insert_camera(&self, new: NewCamera, at: DateTime<Utc>) -> Result<Camera>;

    async fn get_camera(&self, camera_id: Uuid) -> Result<Option<Camera>>;

    async fn list_cameras(&self, stream_id: Uuid) -> Result<Vec<Camera>>;

    /// Validate the target and move the primary flag, appending a switch event.
    async fn switch_primary(
        &self,
        stream_id: Uuid,
        to_camera_id: Uuid,
        switched_by: Uuid,
        at: DateTime<Utc>,
    ) -> Result<SwitchOutcome>;

    /// Toggle `is_active` and touch `last_seen_at`. The primary flag is left alone.
    async fn set_camera_connection(
        &self,
        camera_id: Uuid,
        is_active: bool,
        at: DateTime<Utc>,
    ) -> Result<Camera>;

    /// Delete a camera. Refuses the primary while other cameras remain.
    async fn delete_camera(&self, camera_id: Uuid) -> Result<Camera>;

    /// Newest first.
    async fn switch_history(&self, stream_id: Uuid, limit: usize)
        -> Result<Vec<CameraSwitchEvent>>;
}

/// Everything the coordinator needs from storage
pub trait SessionStore:
    StreamRepository + ViewerRepository + ChatRepository + ReactionRepository + CameraRepository
{
}

impl<T> SessionStore for T where
    T: StreamRepository + ViewerRepository + ChatRepository + ReactionRepository + CameraRepository
{
}
