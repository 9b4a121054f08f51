//! PostgreSQL session store
//!
//! Each mutating call runs in one transaction that first takes `FOR UPDATE` on
//! the stream row, so writes to one stream serialize in the database even across
//! service replicas. `lock_timeout` bounds that wait; a timeout surfaces as
//! `SessionError::Conflict` and is retried by the caller.

mod cameras;
mod chat;
mod reactions;
mod streams;
mod viewers;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::models::{Stream, StreamStatus};
use crate::error::{Result, SessionError};

pub(crate) const STREAM_COLUMNS: &str = "id, creator_id, title, status, created_at, started_at, \
    ended_at, current_viewer_count, peak_viewer_count, likes_count, dislikes_count, shares_count";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Open a transaction whose row-lock waits give up after `lock_timeout`.
    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        // SET does not take bind parameters
        let sql = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&sql).execute(&mut *tx).await?;
        Ok(tx)
    }
}

#[derive(sqlx::FromRow)]
struct StreamRow {
    id: Uuid,
    creator_id: Uuid,
    title: String,
    status: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    current_viewer_count: i64,
    peak_viewer_count: i64,
    likes_count: i64,
    dislikes_count: i64,
    shares_count: i64,
}

impl TryFrom<StreamRow> for Stream {
    type Error = SessionError;

    fn try_from(row: StreamRow) -> Result<Self> {
        Ok(Stream {
            id: row.id,
            creator_id: row.creator_id,
            title: row.title,
            status: row.status.parse()?,
            created_at: row.created_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
            current_viewer_count: row.current_viewer_count,
            peak_viewer_count: row.peak_viewer_count,
            likes_count: row.likes_count,
            dislikes_count: row.dislikes_count,
            shares_count: row.shares_count,
        })
    }
}

/// Lock the stream row for the rest of the transaction.
async fn lock_stream(conn: &mut PgConnection, stream_id: Uuid) -> Result<Stream> {
    let sql = format!("SELECT {} FROM streams WHERE id = $1 FOR UPDATE", STREAM_COLUMNS);
    let row = sqlx::query_as::<_, StreamRow>(&sql)
        .bind(stream_id)
        .fetch_optional(conn)
        .await?
        .ok_or(SessionError::StreamNotFound(stream_id))?;
    row.try_into()
}

async fn stream_status(conn: &mut PgConnection, stream_id: Uuid) -> Result<Option<StreamStatus>> {
    let status: Option<String> = sqlx::query_scalar(
        r#"
        SELECT status FROM streams WHERE id = $1
        "#,
    )
    .bind(stream_id)
    .fetch_optional(conn)
    .await?;

    status.map(|s| s.parse()).transpose()
}

/// Explain why a guarded single-statement write matched no stream row.
async fn rejection(conn: &mut PgConnection, stream_id: Uuid, require_live: bool) -> SessionError {
    match stream_status(conn, stream_id).await {
        Ok(None) => SessionError::StreamNotFound(stream_id),
        Ok(Some(status)) if require_live && status != StreamStatus::Live => {
            SessionError::StreamNotLive(stream_id)
        }
        Ok(Some(StreamStatus::Ended)) => SessionError::StreamEnded(stream_id),
        Ok(Some(status)) => {
            SessionError::Conflict(format!("stream {} changed under write ({})", stream_id, status))
        }
        Err(e) => e,
    }
}
