use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::Shared;
use crate::domain::models::{Actor, ChatMessage, MessageBody, NewChatMessage};
use crate::error::{Result, SessionError};

/// Append-only per-stream chat
///
/// Messages are ordered by `seq`. Moderators soft-delete; nothing is edited.
pub struct ChatLog {
    shared: Shared,
    max_chars: usize,
    history_limit: usize,
}

impl ChatLog {
    pub(crate) fn new(shared: Shared, max_chars: usize, history_limit: usize) -> Self {
        Self {
            shared,
            max_chars,
            history_limit,
        }
    }

    #[instrument(skip(self, text))]
    pub async fn post(
        &self,
        stream_id: Uuid,
        author_id: Uuid,
        text: &str,
        is_admin: bool,
    ) -> Result<ChatMessage> {
        let body = MessageBody::Text {
            text: text.to_string(),
        }
        .normalized(self.max_chars)?;
        self.append("chat.post", stream_id, author_id, body, is_admin)
            .await
    }

    /// Post an image or video. The URL must be http(s); the caption is bounded like text.
    #[instrument(skip(self, body), fields(kind = body.kind()))]
    pub async fn post_media(
        &self,
        stream_id: Uuid,
        author_id: Uuid,
        body: MessageBody,
        is_admin: bool,
    ) -> Result<ChatMessage> {
        if matches!(body, MessageBody::Text { .. }) {
            return Err(SessionError::InvalidInput(
                "media messages need an image or video body".into(),
            ));
        }
        let body = body.normalized(self.max_chars)?;
        self.append("chat.post_media", stream_id, author_id, body, is_admin)
            .await
    }

    async fn append(
        &self,
        operation: &'static str,
        stream_id: Uuid,
        author_id: Uuid,
        body: MessageBody,
        is_admin: bool,
    ) -> Result<ChatMessage> {
        let new = &NewChatMessage {
            stream_id,
            author_id,
            is_admin,
            body,
        };
        let shared = &self.shared;
        let message = shared
            .contended(operation, move || {
                let new = new.clone();
                async move { shared.store.append_message(new, Utc::now()).await }
            })
            .await?;

        debug!(message_id = %message.id, seq = message.seq, "Chat message appended");
        Ok(message)
    }

    /// Soft-delete a message. Deleting an already deleted message changes nothing.
    #[instrument(skip(self, moderator), fields(moderator_id = %moderator.user_id))]
    pub async fn delete(&self, message_id: Uuid, moderator: &Actor) -> Result<ChatMessage> {
        if !moderator.can_moderate() {
            return Err(SessionError::Unauthorized(format!(
                "user {} cannot moderate chat",
                moderator.user_id
            )));
        }

        let shared = &self.shared;
        let moderator_id = moderator.user_id;
        let message = shared
            .contended("chat.delete", move || async move {
                shared
                    .store
                    .soft_delete_message(message_id, moderator_id, Utc::now())
                    .await
            })
            .await?;

        info!(
            stream_id = %message.stream_id,
            deleted_by = ?message.deleted_by,
            "Chat message deleted"
        );
        Ok(message)
    }

    /// The newest `limit` undeleted messages, oldest first.
    pub async fn recent(&self, stream_id: Uuid, limit: usize) -> Result<Vec<ChatMessage>> {
        self.read(stream_id, None, limit).await
    }

    /// Up to `limit` undeleted messages older than `before_seq`, oldest first.
    pub async fn page_before(
        &self,
        stream_id: Uuid,
        before_seq: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        self.read(stream_id, Some(before_seq), limit).await
    }

    async fn read(
        &self,
        stream_id: Uuid,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        self.shared.stream(stream_id).await?;
        let limit = limit.min(self.history_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.shared
            .store
            .recent_messages(stream_id, before, limit)
            .await
    }
}
