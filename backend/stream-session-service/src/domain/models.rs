use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, SessionError};

// ============================================================================
// Stream
// ============================================================================

/// Stream lifecycle status. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Upcoming,
    Live,
    Ended,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Live => "live",
            Self::Ended => "ended",
        }
    }

    /// The only state a stream may move to from `self`, if any.
    pub fn next(&self) -> Option<StreamStatus> {
        match self {
            Self::Upcoming => Some(Self::Live),
            Self::Live => Some(Self::Ended),
            Self::Ended => None,
        }
    }

    pub fn can_transition_to(&self, to: StreamStatus) -> bool {
        self.next() == Some(to)
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamStatus {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "upcoming" => Ok(Self::Upcoming),
            "live" => Ok(Self::Live),
            "ended" => Ok(Self::Ended),
            other => Err(SessionError::Internal(format!(
                "unknown stream status '{}'",
                other
            ))),
        }
    }
}

/// Live stream with its cached counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub title: String,
    pub status: StreamStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub current_viewer_count: i64,
    pub peak_viewer_count: i64,
    pub likes_count: i64,
    pub dislikes_count: i64,
    pub shares_count: i64,
}

impl Stream {
    pub fn counters(&self) -> StreamCounters {
        StreamCounters {
            current_viewer_count: self.current_viewer_count,
            likes_count: self.likes_count,
            dislikes_count: self.dislikes_count,
            shares_count: self.shares_count,
        }
    }

    /// Fails with `StreamEnded` once the stream is terminal.
    pub fn ensure_writable(&self) -> Result<()> {
        match self.status {
            StreamStatus::Ended => Err(SessionError::StreamEnded(self.id)),
            _ => Ok(()),
        }
    }

    /// Joining needs a live stream; before and after the broadcast alike
    pub fn ensure_live(&self) -> Result<()> {
        match self.status {
            StreamStatus::Live => Ok(()),
            StreamStatus::Upcoming | StreamStatus::Ended => {
                Err(SessionError::StreamNotLive(self.id))
            }
        }
    }
}

/// Input for creating a stream
#[derive(Debug, Clone)]
pub struct NewStream {
    pub creator_id: Uuid,
    pub title: String,
}

/// Cached counters carried on the stream row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCounters {
    pub current_viewer_count: i64,
    pub likes_count: i64,
    pub dislikes_count: i64,
    pub shares_count: i64,
}

/// Result of recomputing counters from rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterRepair {
    pub stream_id: Uuid,
    pub before: StreamCounters,
    pub after: StreamCounters,
}

impl CounterRepair {
    pub fn drifted(&self) -> bool {
        self.before != self.after
    }
}

// ============================================================================
// Actors
// ============================================================================

/// Role asserted by the caller; not verified by this service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Viewer,
    Creator,
    Moderator,
    Admin,
}

/// Identity of whoever invokes a moderation or broadcast-control action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(user_id: Uuid, role: ActorRole) -> Self {
        Self { user_id, role }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self::new(user_id, ActorRole::Admin)
    }

    pub fn moderator(user_id: Uuid) -> Self {
        Self::new(user_id, ActorRole::Moderator)
    }

    pub fn viewer(user_id: Uuid) -> Self {
        Self::new(user_id, ActorRole::Viewer)
    }

    /// Creators, moderators and admins may moderate chat and drive cameras.
    pub fn can_moderate(&self) -> bool {
        !matches!(self.role, ActorRole::Viewer)
    }
}

// ============================================================================
// Viewer sessions
// ============================================================================

/// One user's continuous watch interval. `left_at == None` means active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ViewerSession {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl ViewerSession {
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

/// Outcome of opening a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionJoin {
    pub session: ViewerSession,
    /// False when an already-active session was returned unchanged
    pub created: bool,
    pub current_viewer_count: i64,
}

// ============================================================================
// Chat
// ============================================================================

/// Chat message payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageBody {
    Text { text: String },
    Image { url: String, caption: Option<String> },
    Video { url: String, caption: Option<String> },
}

impl MessageBody {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Video { .. } => "video",
        }
    }

    /// Text for text messages, caption for media.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Image { caption, .. } | Self::Video { caption, .. } => caption.as_deref(),
        }
    }

    pub fn media_url(&self) -> Option<&str> {
        match self {
            Self::Text { .. } => None,
            Self::Image { url, .. } | Self::Video { url, .. } => Some(url),
        }
    }

    /// Trim and bound-check text and captions, reject non-http(s) media URLs.
    pub fn normalized(self, max_chars: usize) -> Result<Self> {
        match self {
            Self::Text { text } => Ok(Self::Text {
                text: bounded_text(&text, max_chars)?,
            }),
            Self::Image { url, caption } => Ok(Self::Image {
                url: media_url(url)?,
                caption: optional_caption(caption, max_chars)?,
            }),
            Self::Video { url, caption } => Ok(Self::Video {
                url: media_url(url)?,
                caption: optional_caption(caption, max_chars)?,
            }),
        }
    }

    /// Rebuild a body from its stored columns.
    pub fn from_parts(kind: &str, text: Option<String>, url: Option<String>) -> Result<Self> {
        match (kind, url) {
            ("text", _) => Ok(Self::Text {
                text: text.unwrap_or_default(),
            }),
            ("image", Some(url)) => Ok(Self::Image { url, caption: text }),
            ("video", Some(url)) => Ok(Self::Video { url, caption: text }),
            (other, _) => Err(SessionError::Internal(format!(
                "malformed chat message body of kind '{}'",
                other
            ))),
        }
    }
}

fn bounded_text(raw: &str, max_chars: usize) -> Result<String> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(SessionError::EmptyMessage);
    }
    let len = text.chars().count();
    if len > max_chars {
        return Err(SessionError::MessageTooLong { len, max: max_chars });
    }
    Ok(text.to_string())
}

fn optional_caption(caption: Option<String>, max_chars: usize) -> Result<Option<String>> {
    match caption {
        Some(c) if !c.trim().is_empty() => bounded_text(&c, max_chars).map(Some),
        _ => Ok(None),
    }
}

fn media_url(url: String) -> Result<String> {
    let url = url.trim();
    if !(url.starts_with("https://") || url.starts_with("http://")) || url.len() > 2048 {
        return Err(SessionError::InvalidInput(format!(
            "media url must be an http(s) url: '{}'",
            url
        )));
    }
    Ok(url.to_string())
}

/// Append-only chat entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub stream_id: Uuid,
    /// Monotonically increasing; defines display order
    pub seq: i64,
    pub author_id: Uuid,
    pub is_admin: bool,
    pub body: MessageBody,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
}

impl ChatMessage {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Validated chat input
#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub stream_id: Uuid,
    pub author_id: Uuid,
    pub is_admin: bool,
    pub body: MessageBody,
}

// ============================================================================
// Reactions & shares
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Dislike,
}

impl ReactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
        }
    }

    /// (likes, dislikes) delta for adding one reaction of this kind
    pub fn delta(&self) -> (i64, i64) {
        match self {
            Self::Like => (1, 0),
            Self::Dislike => (0, 1),
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReactionKind {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "like" => Ok(Self::Like),
            "dislike" => Ok(Self::Dislike),
            other => Err(SessionError::InvalidInput(format!(
                "unknown reaction type '{}'",
                other
            ))),
        }
    }
}

/// What a react call did to the user's reaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "lowercase")]
pub enum ReactionChange {
    Added { kind: ReactionKind },
    Removed { kind: ReactionKind },
    Replaced { from: ReactionKind, to: ReactionKind },
}

impl ReactionChange {
    /// Pure state transition: `current` reaction + submitted `kind`.
    pub fn resolve(current: Option<ReactionKind>, kind: ReactionKind) -> Self {
        match current {
            None => Self::Added { kind },
            Some(existing) if existing == kind => Self::Removed { kind },
            Some(existing) => Self::Replaced {
                from: existing,
                to: kind,
            },
        }
    }

    /// The reaction the user holds after the change.
    pub fn resulting(&self) -> Option<ReactionKind> {
        match self {
            Self::Added { kind } => Some(*kind),
            Self::Removed { .. } => None,
            Self::Replaced { to, .. } => Some(*to),
        }
    }

    /// (likes, dislikes) counter delta
    pub fn counter_delta(&self) -> (i64, i64) {
        match self {
            Self::Added { kind } => kind.delta(),
            Self::Removed { kind } => {
                let (l, d) = kind.delta();
                (-l, -d)
            }
            Self::Replaced { from, to } => {
                let (fl, fd) = from.delta();
                let (tl, td) = to.delta();
                (tl - fl, td - fd)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReactionOutcome {
    pub stream_id: Uuid,
    pub user_id: Uuid,
    pub change: ReactionChange,
    pub counters: StreamCounters,
    /// True when this call joined an identical in-flight request
    pub coalesced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ShareEvent {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub user_id: Uuid,
    pub platform: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Cameras
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Camera {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub name: String,
    pub device_id: String,
    pub is_active: bool,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCamera {
    pub stream_id: Uuid,
    pub name: String,
    pub device_id: String,
}

/// Immutable record of a primary camera change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CameraSwitchEvent {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub from_camera_id: Option<Uuid>,
    pub to_camera_id: Uuid,
    pub switched_by: Uuid,
    pub switched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum SwitchOutcome {
    /// Target was already primary; nothing recorded
    Unchanged { camera: Camera },
    Switched { event: CameraSwitchEvent },
}

impl SwitchOutcome {
    pub fn primary_camera_id(&self) -> Uuid {
        match self {
            Self::Unchanged { camera } => camera.id,
            Self::Switched { event } => event.to_camera_id,
        }
    }
}

// ============================================================================
// Dashboard reads
// ============================================================================

/// A committed lifecycle move. Ending a stream closes its sessions in the
/// same atomic unit, so `sessions_closed` is only non-zero for `ended`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamTransition {
    pub stream: Stream,
    pub sessions_closed: u64,
}

/// Result of stopping a stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEndSummary {
    pub stream: Stream,
    pub sessions_closed: u64,
    pub duration_seconds: i64,
}

/// Everything the broadcast dashboard shows in one poll
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub stream: Stream,
    pub active_viewers: i64,
    pub cameras: Vec<Camera>,
    pub primary_camera_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_never_skip() {
        assert!(StreamStatus::Upcoming.can_transition_to(StreamStatus::Live));
        assert!(StreamStatus::Live.can_transition_to(StreamStatus::Ended));
        assert!(!StreamStatus::Upcoming.can_transition_to(StreamStatus::Ended));
        assert!(!StreamStatus::Ended.can_transition_to(StreamStatus::Live));
        assert!(!StreamStatus::Live.can_transition_to(StreamStatus::Live));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [StreamStatus::Upcoming, StreamStatus::Live, StreamStatus::Ended] {
            assert_eq!(status.as_str().parse::<StreamStatus>().unwrap(), status);
        }
        assert!("paused".parse::<StreamStatus>().is_err());
    }

    #[test]
    fn test_reaction_resolution_table() {
        use ReactionKind::*;
        assert_eq!(
            ReactionChange::resolve(None, Like),
            ReactionChange::Added { kind: Like }
        );
        assert_eq!(
            ReactionChange::resolve(Some(Like), Like),
            ReactionChange::Removed { kind: Like }
        );
        assert_eq!(
            ReactionChange::resolve(Some(Like), Dislike),
            ReactionChange::Replaced {
                from: Like,
                to: Dislike
            }
        );
    }

    #[test]
    fn test_replace_moves_one_count_between_counters() {
        let change = ReactionChange::Replaced {
            from: ReactionKind::Like,
            to: ReactionKind::Dislike,
        };
        assert_eq!(change.counter_delta(), (-1, 1));
        assert_eq!(change.resulting(), Some(ReactionKind::Dislike));
    }

    #[test]
    fn test_unknown_reaction_type_is_validation_error() {
        let err = "love".parse::<ReactionKind>().unwrap_err();
        assert!(matches!(err, SessionError::InvalidInput(_)));
        assert_eq!(" Like ".parse::<ReactionKind>().unwrap(), ReactionKind::Like);
    }

    #[test]
    fn test_text_body_is_trimmed_and_bounded() {
        let body = MessageBody::Text {
            text: "  hello  ".into(),
        }
        .normalized(500)
        .unwrap();
        assert_eq!(body.text(), Some("hello"));

        let blank = MessageBody::Text { text: "   ".into() }.normalized(500);
        assert!(matches!(blank, Err(SessionError::EmptyMessage)));

        let long = MessageBody::Text {
            text: "é".repeat(501),
        }
        .normalized(500);
        assert!(matches!(
            long,
            Err(SessionError::MessageTooLong { len: 501, max: 500 })
        ));

        let exact = MessageBody::Text {
            text: "é".repeat(500),
        }
        .normalized(500);
        assert!(exact.is_ok());
    }

    #[test]
    fn test_media_body_requires_http_url() {
        let ok = MessageBody::Image {
            url: "https://cdn.example.com/a.png".into(),
            caption: Some("  ".into()),
        }
        .normalized(500)
        .unwrap();
        assert_eq!(ok.text(), None);
        assert_eq!(ok.media_url(), Some("https://cdn.example.com/a.png"));

        let bad = MessageBody::Video {
            url: "file:///etc/passwd".into(),
            caption: None,
        }
        .normalized(500);
        assert!(matches!(bad, Err(SessionError::InvalidInput(_))));
    }

    #[test]
    fn test_body_from_parts() {
        let body = MessageBody::from_parts(
            "video",
            Some("clip".into()),
            Some("https://v.example.com/1.mp4".into()),
        )
        .unwrap();
        assert_eq!(body.kind(), "video");
        assert!(MessageBody::from_parts("image", None, None).is_err());
    }

    #[test]
    fn test_viewer_cannot_moderate() {
        let id = Uuid::new_v4();
        assert!(!Actor::viewer(id).can_moderate());
        assert!(Actor::moderator(id).can_moderate());
        assert!(Actor::new(id, ActorRole::Creator).can_moderate());
    }
}
