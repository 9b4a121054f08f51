use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{lock_stream, PgStore};
use crate::domain::models::{
    CounterRepair, ReactionChange, ReactionKind, ReactionOutcome, ShareEvent, StreamCounters,
};
use crate::error::Result;
use crate::repository::ReactionRepository;

#[derive(sqlx::FromRow)]
struct CountersRow {
    current_viewer_count: i64,
    likes_count: i64,
    dislikes_count: i64,
    shares_count: i64,
}

impl From<CountersRow> for StreamCounters {
    fn from(row: CountersRow) -> Self {
        StreamCounters {
            current_viewer_count: row.current_viewer_count,
            likes_count: row.likes_count,
            dislikes_count: row.dislikes_count,
            shares_count: row.shares_count,
        }
    }
}

#[async_trait]
impl ReactionRepository for PgStore {
    async fn apply_reaction(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        kind: ReactionKind,
        at: DateTime<Utc>,
    ) -> Result<ReactionOutcome> {
        let mut tx = self.begin().await?;
        lock_stream(&mut tx, stream_id).await?.ensure_writable()?;

        let current: Option<String> = sqlx::query_scalar(
            r#"
            SELECT kind FROM stream_reactions
            WHERE stream_id = $1 AND user_id = $2
            "#,
        )
        .bind(stream_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let current = current.map(|k| k.parse::<ReactionKind>()).transpose()?;

        let change = ReactionChange::resolve(current, kind);
        match change.resulting() {
            Some(kind) => {
                sqlx::query(
                    r#"
                    INSERT INTO stream_reactions (stream_id, user_id, kind, created_at)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (stream_id, user_id) DO UPDATE
                    SET kind = EXCLUDED.kind, created_at = EXCLUDED.created_at
                    "#,
                )
                .bind(stream_id)
                .bind(user_id)
                .bind(kind.as_str())
                .bind(at)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    DELETE FROM stream_reactions
                    WHERE stream_id = $1 AND user_id = $2
                    "#,
                )
                .bind(stream_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        let (likes, dislikes) = change.counter_delta();
        let counters = sqlx::query_as::<_, CountersRow>(
            r#"
            UPDATE streams
            SET likes_count = likes_count + $2,
                dislikes_count = dislikes_count + $3
            WHERE id = $1
            RETURNING current_viewer_count, likes_count, dislikes_count, shares_count
            "#,
        )
        .bind(stream_id)
        .bind(likes)
        .bind(dislikes)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ReactionOutcome {
            stream_id,
            user_id,
            change,
            counters: counters.into(),
            coalesced: false,
        })
    }

    async fn get_reaction(&self, stream_id: Uuid, user_id: Uuid) -> Result<Option<ReactionKind>> {
        let kind: Option<String> = sqlx::query_scalar(
            r#"
            SELECT kind FROM stream_reactions
            WHERE stream_id = $1 AND user_id = $2
            "#,
        )
        .bind(stream_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;

        kind.map(|k| k.parse()).transpose()
    }

    async fn record_share(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        platform: &str,
        at: DateTime<Utc>,
    ) -> Result<ShareEvent> {
        let mut tx = self.begin().await?;
        lock_stream(&mut tx, stream_id).await?.ensure_writable()?;

        let share = sqlx::query_as::<_, ShareEvent>(
            r#"
            INSERT INTO stream_shares (id, stream_id, user_id, platform, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, stream_id, user_id, platform, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(stream_id)
        .bind(user_id)
        .bind(platform)
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE streams SET shares_count = shares_count + 1 WHERE id = $1
            "#,
        )
        .bind(stream_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(share)
    }

    async fn recount(&self, stream_id: Uuid) -> Result<CounterRepair> {
        let mut tx = self.begin().await?;
        let before = lock_stream(&mut tx, stream_id).await?.counters();

        let after = sqlx::query_as::<_, CountersRow>(
            r#"
            UPDATE streams
            SET current_viewer_count = (
                    SELECT COUNT(*) FROM stream_viewer_sessions
                    WHERE stream_id = $1 AND left_at IS NULL
                ),
                likes_count = (
                    SELECT COUNT(*) FROM stream_reactions
                    WHERE stream_id = $1 AND kind = 'like'
                ),
                dislikes_count = (
                    SELECT COUNT(*) FROM stream_reactions
                    WHERE stream_id = $1 AND kind = 'dislike'
                ),
                shares_count = (
                    SELECT COUNT(*) FROM stream_shares WHERE stream_id = $1
                )
            WHERE id = $1
            RETURNING current_viewer_count, likes_count, dislikes_count, shares_count
            "#,
        )
        .bind(stream_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(CounterRepair {
            stream_id,
            before,
            after: after.into(),
        })
    }
}
