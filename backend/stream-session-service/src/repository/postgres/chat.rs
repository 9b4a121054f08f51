use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{rejection, PgStore};
use crate::domain::models::{ChatMessage, MessageBody, NewChatMessage};
use crate::error::{Result, SessionError};
use crate::repository::ChatRepository;

const MESSAGE_COLUMNS: &str = "id, seq, stream_id, author_id, is_admin, body_kind, body_text, \
    media_url, created_at, deleted_at, deleted_by";

const QUALIFIED_MESSAGE_COLUMNS: &str = "m.id, m.seq, m.stream_id, m.author_id, m.is_admin, \
    m.body_kind, m.body_text, m.media_url, m.created_at, m.deleted_at, m.deleted_by";

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    seq: i64,
    stream_id: Uuid,
    author_id: Uuid,
    is_admin: bool,
    body_kind: String,
    body_text: Option<String>,
    media_url: Option<String>,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<Uuid>,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = SessionError;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(ChatMessage {
            id: row.id,
            stream_id: row.stream_id,
            seq: row.seq,
            author_id: row.author_id,
            is_admin: row.is_admin,
            body: MessageBody::from_parts(&row.body_kind, row.body_text, row.media_url)?,
            created_at: row.created_at,
            deleted_at: row.deleted_at,
            deleted_by: row.deleted_by,
        })
    }
}

#[async_trait]
impl ChatRepository for PgStore {
    async fn append_message(
        &self,
        new: NewChatMessage,
        at: DateTime<Utc>,
    ) -> Result<ChatMessage> {
        let sql = format!(
            r#"
            INSERT INTO stream_chat_messages
                (id, stream_id, author_id, is_admin, body_kind, body_text, media_url, created_at)
            SELECT $1, s.id, $3, $4, $5, $6, $7, $8
            FROM streams s
            WHERE s.id = $2 AND s.status <> 'ended'
            FOR SHARE OF s
            RETURNING {}
            "#,
            MESSAGE_COLUMNS
        );
        let mut tx = self.begin().await?;
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.stream_id)
            .bind(new.author_id)
            .bind(new.is_admin)
            .bind(new.body.kind())
            .bind(new.body.text())
            .bind(new.body.media_url())
            .bind(at)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Err(rejection(&mut tx, new.stream_id, false).await);
        };
        tx.commit().await?;

        row.try_into()
    }

    async fn get_message(&self, message_id: Uuid) -> Result<Option<ChatMessage>> {
        let sql = format!(
            "SELECT {} FROM stream_chat_messages WHERE id = $1",
            MESSAGE_COLUMNS
        );
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(message_id)
            .fetch_optional(self.pool())
            .await?;

        row.map(ChatMessage::try_from).transpose()
    }

    async fn soft_delete_message(
        &self,
        message_id: Uuid,
        deleted_by: Uuid,
        at: DateTime<Utc>,
    ) -> Result<ChatMessage> {
        // COALESCE keeps the first deletion's audit fields
        let sql = format!(
            r#"
            UPDATE stream_chat_messages m
            SET deleted_at = COALESCE(m.deleted_at, $3),
                deleted_by = COALESCE(m.deleted_by, $2)
            FROM streams s
            WHERE m.id = $1 AND s.id = m.stream_id AND s.status <> 'ended'
            RETURNING {}
            "#,
            QUALIFIED_MESSAGE_COLUMNS
        );
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(message_id)
            .bind(deleted_by)
            .bind(at)
            .fetch_optional(self.pool())
            .await?;

        if let Some(row) = row {
            return row.try_into();
        }
        match self.get_message(message_id).await? {
            None => Err(SessionError::MessageNotFound(message_id)),
            Some(message) => Err(SessionError::StreamEnded(message.stream_id)),
        }
    }

    async fn recent_messages(
        &self,
        stream_id: Uuid,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM stream_chat_messages
            WHERE stream_id = $1
              AND deleted_at IS NULL
              AND ($2::BIGINT IS NULL OR seq < $2)
            ORDER BY seq DESC
            LIMIT $3
            "#,
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(stream_id)
            .bind(before)
            .bind(limit as i64)
            .fetch_all(self.pool())
            .await?;

        let mut messages = rows
            .into_iter()
            .map(ChatMessage::try_from)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }
}
