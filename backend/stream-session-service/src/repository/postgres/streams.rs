use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{stream_status, PgStore, StreamRow, STREAM_COLUMNS};
use crate::domain::models::{NewStream, Stream, StreamStatus, StreamTransition};
use crate::error::{Result, SessionError};
use crate::repository::StreamRepository;

#[async_trait]
impl StreamRepository for PgStore {
    async fn create_stream(&self, new: NewStream, at: DateTime<Utc>) -> Result<Stream> {
        let sql = format!(
            r#"
            INSERT INTO streams (id, creator_id, title, status, created_at)
            VALUES ($1, $2, $3, 'upcoming', $4)
            RETURNING {}
            "#,
            STREAM_COLUMNS
        );
        let row = sqlx::query_as::<_, StreamRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.creator_id)
            .bind(&new.title)
            .bind(at)
            .fetch_one(self.pool())
            .await?;

        row.try_into()
    }

    async fn get_stream(&self, stream_id: Uuid) -> Result<Option<Stream>> {
        let sql = format!("SELECT {} FROM streams WHERE id = $1", STREAM_COLUMNS);
        let row = sqlx::query_as::<_, StreamRow>(&sql)
            .bind(stream_id)
            .fetch_optional(self.pool())
            .await?;

        row.map(Stream::try_from).transpose()
    }

    async fn transition_stream(
        &self,
        stream_id: Uuid,
        from: StreamStatus,
        to: StreamStatus,
        at: DateTime<Utc>,
    ) -> Result<StreamTransition> {
        if !from.can_transition_to(to) {
            return Err(SessionError::InvalidTransition { from, to });
        }

        let sql = format!(
            r#"
            UPDATE streams
            SET status = $3,
                started_at = CASE WHEN $3 = 'live' THEN $4 ELSE started_at END,
                ended_at = CASE WHEN $3 = 'ended' THEN $4 ELSE ended_at END,
                current_viewer_count = CASE WHEN $3 = 'ended' THEN 0 ELSE current_viewer_count END
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            STREAM_COLUMNS
        );
        let mut tx = self.begin().await?;
        let row = sqlx::query_as::<_, StreamRow>(&sql)
            .bind(stream_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(at)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return match stream_status(&mut tx, stream_id).await? {
                None => Err(SessionError::StreamNotFound(stream_id)),
                Some(current) => Err(SessionError::InvalidTransition { from: current, to }),
            };
        };

        // The UPDATE above holds the stream row, so no join can slip in between
        let sessions_closed = if to == StreamStatus::Ended {
            sqlx::query(
                r#"
                UPDATE stream_viewer_sessions
                SET left_at = GREATEST($2, joined_at)
                WHERE stream_id = $1 AND left_at IS NULL
                "#,
            )
            .bind(stream_id)
            .bind(at)
            .execute(&mut *tx)
            .await?
            .rows_affected()
        } else {
            0
        };
        tx.commit().await?;

        Ok(StreamTransition {
            stream: row.try_into()?,
            sessions_closed,
        })
    }

    async fn list_stream_ids(&self, status: StreamStatus) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT id FROM streams
            WHERE status = $1
            ORDER BY created_at
            "#,
        )
        .bind(status.as_str())
        .fetch_all(self.pool())
        .await?;

        Ok(ids)
    }
}
