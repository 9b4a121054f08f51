use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::{LockKey, Shared};
use crate::domain::models::{Actor, Camera, CameraSwitchEvent, NewCamera, SwitchOutcome};
use crate::error::{Result, SessionError};
use crate::metrics;

#[derive(Debug, Validate)]
struct CameraInput {
    #[validate(length(min = 1, max = 100))]
    name: String,
    #[validate(length(min = 1, max = 255))]
    device_id: String,
}

/// Cameras of each stream and which one is on air
///
/// Every camera write holds the stream's lock, so switches for one stream
/// apply one at a time in arrival order.
pub struct CameraSwitchboard {
    shared: Shared,
    history_limit: usize,
}

impl CameraSwitchboard {
    pub(crate) fn new(shared: Shared, history_limit: usize) -> Self {
        Self {
            shared,
            history_limit,
        }
    }

    /// Register a connected camera. The stream's first camera becomes primary.
    #[instrument(skip(self))]
    pub async fn add_camera(&self, stream_id: Uuid, name: &str, device_id: &str) -> Result<Camera> {
        let input = CameraInput {
            name: name.trim().to_string(),
            device_id: device_id.trim().to_string(),
        };
        input.validate()?;

        let new = &NewCamera {
            stream_id,
            name: input.name,
            device_id: input.device_id,
        };
        let shared = &self.shared;
        let camera = shared
            .contended("camera.add", move || {
                let new = new.clone();
                async move {
                    let _guard = shared.locks.acquire(LockKey::Stream(stream_id)).await?;
                    shared.store.insert_camera(new, Utc::now()).await
                }
            })
            .await?;

        info!(camera_id = %camera.id, primary = camera.is_primary, "Camera added");
        Ok(camera)
    }

    /// Put `to_camera_id` on air. Switching to the current primary succeeds without a new event.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn switch_primary(
        &self,
        stream_id: Uuid,
        to_camera_id: Uuid,
        actor: &Actor,
    ) -> Result<SwitchOutcome> {
        if !actor.can_moderate() {
            return Err(SessionError::Unauthorized(format!(
                "user {} cannot control the broadcast",
                actor.user_id
            )));
        }

        let shared = &self.shared;
        let switched_by = actor.user_id;
        let outcome = shared
            .contended("camera.switch", move || async move {
                let _guard = shared.locks.acquire(LockKey::Stream(stream_id)).await?;
                shared
                    .store
                    .switch_primary(stream_id, to_camera_id, switched_by, Utc::now())
                    .await
            })
            .await;

        match &outcome {
            Ok(SwitchOutcome::Switched { event }) => {
                metrics::record_camera_switch("switched");
                info!(
                    from = ?event.from_camera_id,
                    to = %event.to_camera_id,
                    "Primary camera switched"
                );
            }
            Ok(SwitchOutcome::Unchanged { .. }) => metrics::record_camera_switch("unchanged"),
            Err(e) => metrics::record_camera_switch(e.error_code()),
        }
        outcome
    }

    /// Mark a camera connected or disconnected. A disconnected primary stays primary.
    #[instrument(skip(self))]
    pub async fn set_connection(&self, camera_id: Uuid, is_active: bool) -> Result<Camera> {
        let stream_id = self.owner(camera_id).await?;
        let shared = &self.shared;
        let camera = shared
            .contended("camera.connection", move || async move {
                let _guard = shared.locks.acquire(LockKey::Stream(stream_id)).await?;
                shared
                    .store
                    .set_camera_connection(camera_id, is_active, Utc::now())
                    .await
            })
            .await?;

        if camera.is_primary && !camera.is_active {
            warn!(%stream_id, "Primary camera disconnected; switch required");
        }
        Ok(camera)
    }

    /// Remove a camera. The primary can only go once it is the last camera.
    #[instrument(skip(self))]
    pub async fn remove_camera(&self, camera_id: Uuid) -> Result<Camera> {
        let stream_id = self.owner(camera_id).await?;
        let shared = &self.shared;
        let camera = shared
            .contended("camera.remove", move || async move {
                let _guard = shared.locks.acquire(LockKey::Stream(stream_id)).await?;
                shared.store.delete_camera(camera_id).await
            })
            .await?;

        info!(%stream_id, %camera_id, "Camera removed");
        Ok(camera)
    }

    pub async fn cameras(&self, stream_id: Uuid) -> Result<Vec<Camera>> {
        self.shared.stream(stream_id).await?;
        self.shared.store.list_cameras(stream_id).await
    }

    pub async fn primary(&self, stream_id: Uuid) -> Result<Option<Camera>> {
        let cameras = self.cameras(stream_id).await?;
        Ok(cameras.into_iter().find(|c| c.is_primary))
    }

    /// Switch events, newest first.
    pub async fn history(&self, stream_id: Uuid, limit: usize) -> Result<Vec<CameraSwitchEvent>> {
        self.shared.stream(stream_id).await?;
        let limit = limit.min(self.history_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.shared.store.switch_history(stream_id, limit).await
    }

    async fn owner(&self, camera_id: Uuid) -> Result<Uuid> {
        self.shared
            .store
            .get_camera(camera_id)
            .await?
            .map(|camera| camera.stream_id)
            .ok_or(SessionError::CameraNotFound(camera_id))
    }
}
