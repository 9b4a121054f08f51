use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{lock_stream, rejection, PgStore};
use crate::domain::models::{SessionJoin, ViewerSession};
use crate::error::{Result, SessionError};
use crate::repository::ViewerRepository;

#[async_trait]
impl ViewerRepository for PgStore {
    async fn open_session(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<SessionJoin> {
        let mut tx = self.begin().await?;

        // Bumping the counter first takes the stream row lock and checks liveness
        let count: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE streams
            SET current_viewer_count = current_viewer_count + 1,
                peak_viewer_count = GREATEST(peak_viewer_count, current_viewer_count + 1)
            WHERE id = $1 AND status = 'live'
            RETURNING current_viewer_count
            "#,
        )
        .bind(stream_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(count) = count else {
            return Err(rejection(&mut tx, stream_id, true).await);
        };

        let existing = sqlx::query_as::<_, ViewerSession>(
            r#"
            SELECT id, stream_id, user_id, joined_at, left_at
            FROM stream_viewer_sessions
            WHERE stream_id = $1 AND user_id = $2 AND left_at IS NULL
            "#,
        )
        .bind(stream_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(session) = existing {
            // Already watching; undo the bump
            tx.rollback().await?;
            return Ok(SessionJoin {
                session,
                created: false,
                current_viewer_count: count - 1,
            });
        }

        let session = sqlx::query_as::<_, ViewerSession>(
            r#"
            INSERT INTO stream_viewer_sessions (id, stream_id, user_id, joined_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, stream_id, user_id, joined_at, left_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(stream_id)
        .bind(user_id)
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SessionJoin {
            session,
            created: true,
            current_viewer_count: count,
        })
    }

    async fn close_session(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<ViewerSession>> {
        let mut tx = self.begin().await?;
        // Stream row first, in the same order as every other writer
        lock_stream(&mut tx, stream_id).await?;

        let closed = sqlx::query_as::<_, ViewerSession>(
            r#"
            UPDATE stream_viewer_sessions
            SET left_at = GREATEST($3, joined_at)
            WHERE stream_id = $1 AND user_id = $2 AND left_at IS NULL
            RETURNING id, stream_id, user_id, joined_at, left_at
            "#,
        )
        .bind(stream_id)
        .bind(user_id)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?;

        if closed.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query(
            r#"
            UPDATE streams
            SET current_viewer_count = GREATEST(current_viewer_count - 1, 0)
            WHERE id = $1
            "#,
        )
        .bind(stream_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(closed)
    }

    async fn close_all_sessions(&self, stream_id: Uuid, at: DateTime<Utc>) -> Result<u64> {
        let mut tx = self.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE streams SET current_viewer_count = 0 WHERE id = $1
            "#,
        )
        .bind(stream_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(SessionError::StreamNotFound(stream_id));
        }

        let closed = sqlx::query(
            r#"
            UPDATE stream_viewer_sessions
            SET left_at = GREATEST($2, joined_at)
            WHERE stream_id = $1 AND left_at IS NULL
            "#,
        )
        .bind(stream_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(closed.rows_affected())
    }

    async fn count_active_sessions(&self, stream_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM stream_viewer_sessions
            WHERE stream_id = $1 AND left_at IS NULL
            "#,
        )
        .bind(stream_id)
        .fetch_one(self.pool())
        .await?;

        Ok(count)
    }

    async fn active_sessions(&self, stream_id: Uuid) -> Result<Vec<ViewerSession>> {
        let sessions = sqlx::query_as::<_, ViewerSession>(
            r#"
            SELECT id, stream_id, user_id, joined_at, left_at
            FROM stream_viewer_sessions
            WHERE stream_id = $1 AND left_at IS NULL
            ORDER BY joined_at
            "#,
        )
        .bind(stream_id)
        .fetch_all(self.pool())
        .await?;

        Ok(sessions)
    }
}
