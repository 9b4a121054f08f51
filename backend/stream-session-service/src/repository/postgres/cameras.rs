use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{lock_stream, PgStore};
use crate::domain::models::{Camera, CameraSwitchEvent, NewCamera, SwitchOutcome};
use crate::error::{Result, SessionError};
use crate::repository::CameraRepository;

#[async_trait]
impl CameraRepository for PgStore {
    async fn insert_camera(&self, new: NewCamera, at: DateTime<Utc>) -> Result<Camera> {
        let mut tx = self.begin().await?;
        lock_stream(&mut tx, new.stream_id).await?.ensure_writable()?;

        // First camera of a stream goes on air
        let camera = sqlx::query_as::<_, Camera>(
            r#"
            INSERT INTO stream_cameras
                (id, stream_id, name, device_id, is_active, is_primary, created_at, last_seen_at)
            VALUES (
                $1, $2, $3, $4, TRUE,
                NOT EXISTS (SELECT 1 FROM stream_cameras WHERE stream_id = $2 AND is_primary),
                $5, $5
            )
            RETURNING id, stream_id, name, device_id, is_active, is_primary, created_at, last_seen_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.stream_id)
        .bind(&new.name)
        .bind(&new.device_id)
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(camera)
    }

    async fn get_camera(&self, camera_id: Uuid) -> Result<Option<Camera>> {
        let camera = sqlx::query_as::<_, Camera>(
            r#"
            SELECT id, stream_id, name, device_id, is_active, is_primary, created_at, last_seen_at
            FROM stream_cameras
            WHERE id = $1
            "#,
        )
        .bind(camera_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(camera)
    }

    async fn list_cameras(&self, stream_id: Uuid) -> Result<Vec<Camera>> {
        let cameras = sqlx::query_as::<_, Camera>(
            r#"
            SELECT id, stream_id, name, device_id, is_active, is_primary, created_at, last_seen_at
            FROM stream_cameras
            WHERE stream_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(stream_id)
        .fetch_all(self.pool())
        .await?;

        Ok(cameras)
    }

    async fn switch_primary(
        &self,
        stream_id: Uuid,
        to_camera_id: Uuid,
        switched_by: Uuid,
        at: DateTime<Utc>,
    ) -> Result<SwitchOutcome> {
        let mut tx = self.begin().await?;
        lock_stream(&mut tx, stream_id).await?.ensure_writable()?;

        let target = sqlx::query_as::<_, Camera>(
            r#"
            SELECT id, stream_id, name, device_id, is_active, is_primary, created_at, last_seen_at
            FROM stream_cameras
            WHERE id = $1 AND stream_id = $2
            "#,
        )
        .bind(to_camera_id)
        .bind(stream_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(SessionError::CameraNotFound(to_camera_id))?;

        if !target.is_active {
            return Err(SessionError::CameraInactive(to_camera_id));
        }
        if target.is_primary {
            return Ok(SwitchOutcome::Unchanged { camera: target });
        }

        // Clear before set; the partial unique index allows one primary per stream
        let previous: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE stream_cameras SET is_primary = FALSE
            WHERE stream_id = $1 AND is_primary
            RETURNING id
            "#,
        )
        .bind(stream_id)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE stream_cameras SET is_primary = TRUE WHERE id = $1
            "#,
        )
        .bind(to_camera_id)
        .execute(&mut *tx)
        .await?;

        let event = sqlx::query_as::<_, CameraSwitchEvent>(
            r#"
            INSERT INTO camera_switch_events
                (id, stream_id, from_camera_id, to_camera_id, switched_by, switched_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, stream_id, from_camera_id, to_camera_id, switched_by, switched_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(stream_id)
        .bind(previous)
        .bind(to_camera_id)
        .bind(switched_by)
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SwitchOutcome::Switched { event })
    }

    async fn set_camera_connection(
        &self,
        camera_id: Uuid,
        is_active: bool,
        at: DateTime<Utc>,
    ) -> Result<Camera> {
        let mut tx = self.begin().await?;
        let stream_id = camera_stream(&mut tx, camera_id).await?;
        lock_stream(&mut tx, stream_id).await?.ensure_writable()?;

        let camera = sqlx::query_as::<_, Camera>(
            r#"
            UPDATE stream_cameras
            SET is_active = $2, last_seen_at = $3
            WHERE id = $1
            RETURNING id, stream_id, name, device_id, is_active, is_primary, created_at, last_seen_at
            "#,
        )
        .bind(camera_id)
        .bind(is_active)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(SessionError::CameraNotFound(camera_id))?;

        tx.commit().await?;

        Ok(camera)
    }

    async fn delete_camera(&self, camera_id: Uuid) -> Result<Camera> {
        let mut tx = self.begin().await?;
        let stream_id = camera_stream(&mut tx, camera_id).await?;
        lock_stream(&mut tx, stream_id).await?.ensure_writable()?;

        let camera = sqlx::query_as::<_, Camera>(
            r#"
            DELETE FROM stream_cameras
            WHERE id = $1
            RETURNING id, stream_id, name, device_id, is_active, is_primary, created_at, last_seen_at
            "#,
        )
        .bind(camera_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(SessionError::CameraNotFound(camera_id))?;

        if camera.is_primary {
            let others: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM stream_cameras WHERE stream_id = $1
                "#,
            )
            .bind(stream_id)
            .fetch_one(&mut *tx)
            .await?;

            if others > 0 {
                tx.rollback().await?;
                return Err(SessionError::PrimaryCameraRemoval(camera_id));
            }
        }

        tx.commit().await?;

        Ok(camera)
    }

    async fn switch_history(
        &self,
        stream_id: Uuid,
        limit: usize,
    ) -> Result<Vec<CameraSwitchEvent>> {
        let events = sqlx::query_as::<_, CameraSwitchEvent>(
            r#"
            SELECT id, stream_id, from_camera_id, to_camera_id, switched_by, switched_at
            FROM camera_switch_events
            WHERE stream_id = $1
            ORDER BY seq DESC
            LIMIT $2
            "#,
        )
        .bind(stream_id)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        Ok(events)
    }
}

async fn camera_stream(conn: &mut sqlx::PgConnection, camera_id: Uuid) -> Result<Uuid> {
    let stream_id: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT stream_id FROM stream_cameras WHERE id = $1
        "#,
    )
    .bind(camera_id)
    .fetch_optional(conn)
    .await?;

    stream_id.ok_or(SessionError::CameraNotFound(camera_id))
}
