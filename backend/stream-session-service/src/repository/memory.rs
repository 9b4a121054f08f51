//! In-process session store
//!
//! Each stream owns one mutex over all of its rows, so every repository call is
//! atomic per stream while unrelated streams never contend. Used by tests and
//! by single-node deployments started with `SESSION_STORE=memory`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{CameraRepository, ChatRepository, ReactionRepository, StreamRepository, ViewerRepository};
use crate::domain::models::*;
use crate::error::{Result, SessionError};

struct StreamState {
    stream: Stream,
    /// Full session history, including closed sessions
    sessions: Vec<ViewerSession>,
    /// user_id -> index into `sessions` of the active session
    active: HashMap<Uuid, usize>,
    /// Ordered by `seq`
    messages: Vec<ChatMessage>,
    reactions: HashMap<Uuid, ReactionKind>,
    shares: Vec<ShareEvent>,
    /// Insertion order
    cameras: Vec<Camera>,
    /// Oldest first
    switches: Vec<CameraSwitchEvent>,
}

impl StreamState {
    fn new(stream: Stream) -> Self {
        Self {
            stream,
            sessions: Vec::new(),
            active: HashMap::new(),
            messages: Vec::new(),
            reactions: HashMap::new(),
            shares: Vec::new(),
            cameras: Vec::new(),
            switches: Vec::new(),
        }
    }

    fn camera_index(&self, camera_id: Uuid) -> Option<usize> {
        self.cameras.iter().position(|c| c.id == camera_id)
    }

    fn primary_index(&self) -> Option<usize> {
        self.cameras.iter().position(|c| c.is_primary)
    }

    fn close_active(&mut self, at: DateTime<Utc>) -> u64 {
        let active: Vec<usize> = self.active.drain().map(|(_, idx)| idx).collect();
        for idx in &active {
            self.sessions[*idx].left_at = Some(at);
        }
        self.stream.current_viewer_count = 0;
        active.len() as u64
    }
}

#[derive(Default)]
pub struct MemoryStore {
    streams: DashMap<Uuid, Arc<Mutex<StreamState>>>,
    camera_owner: DashMap<Uuid, Uuid>,
    message_owner: DashMap<Uuid, Uuid>,
    next_seq: AtomicI64,
    write_latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every contended write by `latency` before it takes the stream
    /// lock, mimicking a database round trip so overlapping requests overlap.
    pub fn with_write_latency(latency: Duration) -> Self {
        Self {
            write_latency: Some(latency),
            ..Self::default()
        }
    }

    /// Overwrite the cached counters without touching any rows.
    /// Exists to rehearse drift repair.
    pub fn force_counters(&self, stream_id: Uuid, counters: StreamCounters) -> Result<()> {
        let state = self.state(stream_id)?;
        let mut state = state.lock();
        state.stream.current_viewer_count = counters.current_viewer_count;
        state.stream.likes_count = counters.likes_count;
        state.stream.dislikes_count = counters.dislikes_count;
        state.stream.shares_count = counters.shares_count;
        Ok(())
    }

    fn state(&self, stream_id: Uuid) -> Result<Arc<Mutex<StreamState>>> {
        self.streams
            .get(&stream_id)
            .map(|entry| entry.value().clone())
            .ok_or(SessionError::StreamNotFound(stream_id))
    }

    fn camera_state(&self, camera_id: Uuid) -> Result<Arc<Mutex<StreamState>>> {
        let stream_id = self
            .camera_owner
            .get(&camera_id)
            .map(|entry| *entry.value())
            .ok_or(SessionError::CameraNotFound(camera_id))?;
        self.state(stream_id)
    }

    async fn round_trip(&self) {
        if let Some(latency) = self.write_latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl StreamRepository for MemoryStore {
    async fn create_stream(&self, new: NewStream, at: DateTime<Utc>) -> Result<Stream> {
        let stream = Stream {
            id: Uuid::new_v4(),
            creator_id: new.creator_id,
            title: new.title,
            status: StreamStatus::Upcoming,
            created_at: at,
            started_at: None,
            ended_at: None,
            current_viewer_count: 0,
            peak_viewer_count: 0,
            likes_count: 0,
            dislikes_count: 0,
            shares_count: 0,
        };
        self.streams
            .insert(stream.id, Arc::new(Mutex::new(StreamState::new(stream.clone()))));
        Ok(stream)
    }

    async fn get_stream(&self, stream_id: Uuid) -> Result<Option<Stream>> {
        match self.state(stream_id) {
            Ok(state) => Ok(Some(state.lock().stream.clone())),
            Err(SessionError::StreamNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn transition_stream(
        &self,
        stream_id: Uuid,
        from: StreamStatus,
        to: StreamStatus,
        at: DateTime<Utc>,
    ) -> Result<StreamTransition> {
        let state = self.state(stream_id)?;
        let mut state = state.lock();
        let current = state.stream.status;
        if current != from || !from.can_transition_to(to) {
            return Err(SessionError::InvalidTransition { from: current, to });
        }
        state.stream.status = to;
        let mut sessions_closed = 0;
        match to {
            StreamStatus::Live => state.stream.started_at = Some(at),
            StreamStatus::Ended => {
                state.stream.ended_at = Some(at);
                sessions_closed = state.close_active(at);
            }
            StreamStatus::Upcoming => {}
        }
        Ok(StreamTransition {
            stream: state.stream.clone(),
            sessions_closed,
        })
    }

    async fn list_stream_ids(&self, status: StreamStatus) -> Result<Vec<Uuid>> {
        let states: Vec<_> = self.streams.iter().map(|e| e.value().clone()).collect();
        Ok(states
            .into_iter()
            .filter_map(|state| {
                let state = state.lock();
                (state.stream.status == status).then_some(state.stream.id)
            })
            .collect())
    }
}

#[async_trait]
impl ViewerRepository for MemoryStore {
    async fn open_session(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<SessionJoin> {
        self.round_trip().await;
        let state = self.state(stream_id)?;
        let mut state = state.lock();
        state.stream.ensure_live()?;

        if let Some(&idx) = state.active.get(&user_id) {
            return Ok(SessionJoin {
                session: state.sessions[idx].clone(),
                created: false,
                current_viewer_count: state.stream.current_viewer_count,
            });
        }

        let session = ViewerSession {
            id: Uuid::new_v4(),
            stream_id,
            user_id,
            joined_at: at,
            left_at: None,
        };
        state.sessions.push(session.clone());
        let idx = state.sessions.len() - 1;
        state.active.insert(user_id, idx);
        state.stream.current_viewer_count += 1;
        state.stream.peak_viewer_count = state
            .stream
            .peak_viewer_count
            .max(state.stream.current_viewer_count);

        Ok(SessionJoin {
            session,
            created: true,
            current_viewer_count: state.stream.current_viewer_count,
        })
    }

    async fn close_session(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<ViewerSession>> {
        self.round_trip().await;
        let state = self.state(stream_id)?;
        let mut state = state.lock();
        let Some(idx) = state.active.remove(&user_id) else {
            return Ok(None);
        };
        state.sessions[idx].left_at = Some(at);
        state.stream.current_viewer_count = (state.stream.current_viewer_count - 1).max(0);
        Ok(Some(state.sessions[idx].clone()))
    }

    async fn close_all_sessions(&self, stream_id: Uuid, at: DateTime<Utc>) -> Result<u64> {
        let state = self.state(stream_id)?;
        let closed = state.lock().close_active(at);
        Ok(closed)
    }

    async fn count_active_sessions(&self, stream_id: Uuid) -> Result<i64> {
        let state = self.state(stream_id)?;
        let count = state.lock().active.len() as i64;
        Ok(count)
    }

    async fn active_sessions(&self, stream_id: Uuid) -> Result<Vec<ViewerSession>> {
        let state = self.state(stream_id)?;
        let state = state.lock();
        let mut sessions: Vec<ViewerSession> = state
            .active
            .values()
            .map(|idx| state.sessions[*idx].clone())
            .collect();
        sessions.sort_by_key(|s| s.joined_at);
        Ok(sessions)
    }
}

#[async_trait]
impl ChatRepository for MemoryStore {
    async fn append_message(
        &self,
        new: NewChatMessage,
        at: DateTime<Utc>,
    ) -> Result<ChatMessage> {
        let state = self.state(new.stream_id)?;
        let mut state = state.lock();
        state.stream.ensure_writable()?;

        let message = ChatMessage {
            id: Uuid::new_v4(),
            stream_id: new.stream_id,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst) + 1,
            author_id: new.author_id,
            is_admin: new.is_admin,
            body: new.body,
            created_at: at,
            deleted_at: None,
            deleted_by: None,
        };
        state.messages.push(message.clone());
        self.message_owner.insert(message.id, message.stream_id);
        Ok(message)
    }

    async fn get_message(&self, message_id: Uuid) -> Result<Option<ChatMessage>> {
        let Some(stream_id) = self.message_owner.get(&message_id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let state = self.state(stream_id)?;
        let state = state.lock();
        Ok(state.messages.iter().find(|m| m.id == message_id).cloned())
    }

    async fn soft_delete_message(
        &self,
        message_id: Uuid,
        deleted_by: Uuid,
        at: DateTime<Utc>,
    ) -> Result<ChatMessage> {
        let stream_id = self
            .message_owner
            .get(&message_id)
            .map(|e| *e.value())
            .ok_or(SessionError::MessageNotFound(message_id))?;
        let state = self.state(stream_id)?;
        let mut state = state.lock();
        state.stream.ensure_writable()?;

        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(SessionError::MessageNotFound(message_id))?;
        if message.deleted_at.is_none() {
            message.deleted_at = Some(at);
            message.deleted_by = Some(deleted_by);
        }
        Ok(message.clone())
    }

    async fn recent_messages(
        &self,
        stream_id: Uuid,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        let state = self.state(stream_id)?;
        let state = state.lock();
        let mut messages: Vec<ChatMessage> = state
            .messages
            .iter()
            .rev()
            .filter(|m| !m.is_deleted() && before.map_or(true, |b| m.seq < b))
            .take(limit)
            .cloned()
            .collect();
        messages.reverse();
        Ok(messages)
    }
}

#[async_trait]
impl ReactionRepository for MemoryStore {
    async fn apply_reaction(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        kind: ReactionKind,
        _at: DateTime<Utc>,
    ) -> Result<ReactionOutcome> {
        self.round_trip().await;
        let state = self.state(stream_id)?;
        let mut state = state.lock();
        state.stream.ensure_writable()?;

        let change = ReactionChange::resolve(state.reactions.get(&user_id).copied(), kind);
        match change.resulting() {
            Some(kind) => state.reactions.insert(user_id, kind),
            None => state.reactions.remove(&user_id),
        };
        let (likes, dislikes) = change.counter_delta();
        state.stream.likes_count += likes;
        state.stream.dislikes_count += dislikes;

        Ok(ReactionOutcome {
            stream_id,
            user_id,
            change,
            counters: state.stream.counters(),
            coalesced: false,
        })
    }

    async fn get_reaction(&self, stream_id: Uuid, user_id: Uuid) -> Result<Option<ReactionKind>> {
        let state = self.state(stream_id)?;
        let kind = state.lock().reactions.get(&user_id).copied();
        Ok(kind)
    }

    async fn record_share(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        platform: &str,
        at: DateTime<Utc>,
    ) -> Result<ShareEvent> {
        let state = self.state(stream_id)?;
        let mut state = state.lock();
        state.stream.ensure_writable()?;

        let share = ShareEvent {
            id: Uuid::new_v4(),
            stream_id,
            user_id,
            platform: platform.to_string(),
            created_at: at,
        };
        state.shares.push(share.clone());
        state.stream.shares_count += 1;
        Ok(share)
    }

    async fn recount(&self, stream_id: Uuid) -> Result<CounterRepair> {
        let state = self.state(stream_id)?;
        let mut state = state.lock();
        let before = state.stream.counters();

        let count_of = |kind: ReactionKind| {
            state.reactions.values().filter(|k| **k == kind).count() as i64
        };
        let after = StreamCounters {
            current_viewer_count: state.active.len() as i64,
            likes_count: count_of(ReactionKind::Like),
            dislikes_count: count_of(ReactionKind::Dislike),
            shares_count: state.shares.len() as i64,
        };

        state.stream.current_viewer_count = after.current_viewer_count;
        state.stream.likes_count = after.likes_count;
        state.stream.dislikes_count = after.dislikes_count;
        state.stream.shares_count = after.shares_count;

        Ok(CounterRepair {
            stream_id,
            before,
            after,
        })
    }
}

#[async_trait]
impl CameraRepository for MemoryStore {
    async fn insert_camera(&self, new: NewCamera, at: DateTime<Utc>) -> Result<Camera> {
        let state = self.state(new.stream_id)?;
        let mut state = state.lock();
        state.stream.ensure_writable()?;

        let camera = Camera {
            id: Uuid::new_v4(),
            stream_id: new.stream_id,
            name: new.name,
            device_id: new.device_id,
            is_active: true,
            is_primary: state.primary_index().is_none(),
            created_at: at,
            last_seen_at: at,
        };
        state.cameras.push(camera.clone());
        self.camera_owner.insert(camera.id, camera.stream_id);
        Ok(camera)
    }

    async fn get_camera(&self, camera_id: Uuid) -> Result<Option<Camera>> {
        let state = match self.camera_state(camera_id) {
            Ok(state) => state,
            Err(SessionError::CameraNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let state = state.lock();
        Ok(state.camera_index(camera_id).map(|idx| state.cameras[idx].clone()))
    }

    async fn list_cameras(&self, stream_id: Uuid) -> Result<Vec<Camera>> {
        let state = self.state(stream_id)?;
        let cameras = state.lock().cameras.clone();
        Ok(cameras)
    }

    async fn switch_primary(
        &self,
        stream_id: Uuid,
        to_camera_id: Uuid,
        switched_by: Uuid,
        at: DateTime<Utc>,
    ) -> Result<SwitchOutcome> {
        self.round_trip().await;
        let state = self.state(stream_id)?;
        let mut state = state.lock();
        state.stream.ensure_writable()?;

        let target = state
            .camera_index(to_camera_id)
            .ok_or(SessionError::CameraNotFound(to_camera_id))?;
        if !state.cameras[target].is_active {
            return Err(SessionError::CameraInactive(to_camera_id));
        }

        let previous = state.primary_index();
        if previous == Some(target) {
            return Ok(SwitchOutcome::Unchanged {
                camera: state.cameras[target].clone(),
            });
        }

        if let Some(prev) = previous {
            state.cameras[prev].is_primary = false;
        }
        state.cameras[target].is_primary = true;

        let event = CameraSwitchEvent {
            id: Uuid::new_v4(),
            stream_id,
            from_camera_id: previous.map(|idx| state.cameras[idx].id),
            to_camera_id,
            switched_by,
            switched_at: at,
        };
        state.switches.push(event.clone());
        Ok(SwitchOutcome::Switched { event })
    }

    async fn set_camera_connection(
        &self,
        camera_id: Uuid,
        is_active: bool,
        at: DateTime<Utc>,
    ) -> Result<Camera> {
        let state = self.camera_state(camera_id)?;
        let mut state = state.lock();
        state.stream.ensure_writable()?;

        let idx = state
            .camera_index(camera_id)
            .ok_or(SessionError::CameraNotFound(camera_id))?;
        let camera = &mut state.cameras[idx];
        camera.is_active = is_active;
        camera.last_seen_at = at;
        Ok(camera.clone())
    }

    async fn delete_camera(&self, camera_id: Uuid) -> Result<Camera> {
        let state = self.camera_state(camera_id)?;
        let mut state = state.lock();
        state.stream.ensure_writable()?;

        let idx = state
            .camera_index(camera_id)
            .ok_or(SessionError::CameraNotFound(camera_id))?;
        if state.cameras[idx].is_primary && state.cameras.len() > 1 {
            return Err(SessionError::PrimaryCameraRemoval(camera_id));
        }
        let camera = state.cameras.remove(idx);
        self.camera_owner.remove(&camera_id);
        Ok(camera)
    }

    async fn switch_history(
        &self,
        stream_id: Uuid,
        limit: usize,
    ) -> Result<Vec<CameraSwitchEvent>> {
        let state = self.state(stream_id)?;
        let state = state.lock();
        Ok(state.switches.iter().rev().take(limit).cloned().collect())
    }
}
