//! Stream lifecycle and dashboard snapshot tests

mod common;

use stream_session_service::domain::models::{Actor, ReactionKind, StreamStatus};
use stream_session_service::services::LockKey;
use stream_session_service::SessionError;
use uuid::Uuid;

use common::{coordinator, live_stream, upcoming_stream};

// ============================================
// Transitions
// ============================================

#[tokio::test]
async fn test_stream_moves_forward_only() {
    let coordinator = coordinator();
    let creator = Uuid::new_v4();
    let stream = coordinator
        .create_stream(creator, "  Studio session  ")
        .await
        .unwrap();
    assert_eq!(stream.status, StreamStatus::Upcoming);
    assert_eq!(stream.title, "Studio session");
    assert_eq!(stream.creator_id, creator);
    assert!(stream.started_at.is_none());

    let err = coordinator.stop(stream.id).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidTransition {
            from: StreamStatus::Upcoming,
            to: StreamStatus::Ended
        }
    ));

    // Going live without any camera is allowed
    let live = coordinator.start(stream.id).await.unwrap();
    assert_eq!(live.status, StreamStatus::Live);
    assert!(live.started_at.is_some());

    let err = coordinator.start(stream.id).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidTransition { from: StreamStatus::Live, .. }));

    let summary = coordinator.stop(stream.id).await.unwrap();
    assert_eq!(summary.stream.status, StreamStatus::Ended);
    assert!(summary.stream.ended_at >= summary.stream.started_at);
    assert!(summary.duration_seconds >= 0);

    for err in [
        coordinator.start(stream.id).await.unwrap_err(),
        coordinator.stop(stream.id).await.unwrap_err(),
    ] {
        assert!(matches!(err, SessionError::InvalidTransition { from: StreamStatus::Ended, .. }));
    }
}

#[tokio::test]
async fn test_create_stream_validates_title() {
    let coordinator = coordinator();

    let err = coordinator
        .create_stream(Uuid::new_v4(), "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidInput(_)));

    let err = coordinator
        .create_stream(Uuid::new_v4(), &"t".repeat(201))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidInput(_)));
}

#[tokio::test]
async fn test_unknown_stream() {
    let coordinator = coordinator();
    let missing = Uuid::new_v4();

    assert!(matches!(
        coordinator.start(missing).await.unwrap_err(),
        SessionError::StreamNotFound(_)
    ));
    assert!(matches!(
        coordinator.snapshot(missing).await.unwrap_err(),
        SessionError::StreamNotFound(_)
    ));
    assert!(matches!(
        coordinator.viewers().active_count(missing).await.unwrap_err(),
        SessionError::StreamNotFound(_)
    ));
    assert!(matches!(
        coordinator.cameras().history(missing, 10).await.unwrap_err(),
        SessionError::StreamNotFound(_)
    ));
}

#[tokio::test]
async fn test_stop_leaves_no_stream_locks() {
    let coordinator = coordinator();
    let stream = live_stream(&coordinator).await;
    let other = live_stream(&coordinator).await;

    coordinator.viewers().join(stream.id, Uuid::new_v4()).await.unwrap();
    coordinator.viewers().join(other.id, Uuid::new_v4()).await.unwrap();
    assert!(coordinator.locks().is_empty());

    // A holder on another stream is untouched by the stop
    let held = coordinator
        .locks()
        .acquire(LockKey::Stream(other.id))
        .await
        .unwrap();
    let summary = coordinator.stop(stream.id).await.unwrap();
    assert_eq!(summary.sessions_closed, 1);
    assert_eq!(coordinator.locks().len(), 1);

    drop(held);
    assert!(coordinator.locks().is_empty());
}

#[tokio::test]
async fn test_rejected_and_noop_writes_leave_no_locks() {
    let coordinator = coordinator();
    let ended = live_stream(&coordinator).await;
    coordinator.stop(ended.id).await.unwrap();

    for _ in 0..200 {
        let user = Uuid::new_v4();
        let err = coordinator.viewers().join(ended.id, user).await.unwrap_err();
        assert!(matches!(err, SessionError::StreamNotLive(_)));
        let err = coordinator
            .reactions()
            .react(ended.id, user, ReactionKind::Like)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::StreamEnded(_)));
    }

    let upcoming = upcoming_stream(&coordinator).await;
    for _ in 0..200 {
        let left = coordinator
            .viewers()
            .leave(upcoming.id, Uuid::new_v4())
            .await
            .unwrap();
        assert!(left.is_none());
    }

    assert!(coordinator.locks().is_empty());
}

#[tokio::test]
async fn test_busy_stop_keeps_stream_live_and_can_be_retried() {
    let coordinator = coordinator();
    let stream = live_stream(&coordinator).await;
    for _ in 0..2 {
        coordinator.viewers().join(stream.id, Uuid::new_v4()).await.unwrap();
    }

    let held = coordinator
        .locks()
        .acquire(LockKey::Stream(stream.id))
        .await
        .unwrap();
    let err = coordinator.stop(stream.id).await.unwrap_err();
    assert!(matches!(err, SessionError::Busy(_)));
    drop(held);

    // Nothing was half applied: still live, every session still open
    let current = coordinator.stream(stream.id).await.unwrap();
    assert_eq!(current.status, StreamStatus::Live);
    assert_eq!(current.current_viewer_count, 2);
    assert_eq!(coordinator.viewers().active_count(stream.id).await.unwrap(), 2);

    let summary = coordinator.stop(stream.id).await.unwrap();
    assert_eq!(summary.sessions_closed, 2);
    assert_eq!(summary.stream.status, StreamStatus::Ended);
    assert_eq!(summary.stream.current_viewer_count, 0);
    assert_eq!(coordinator.viewers().active_count(stream.id).await.unwrap(), 0);
}

// ============================================
// Snapshot
// ============================================

#[tokio::test]
async fn test_snapshot_reflects_every_component() {
    let coordinator = coordinator();
    let stream = live_stream(&coordinator).await;
    let admin = Actor::admin(stream.creator_id);

    for _ in 0..2 {
        coordinator.viewers().join(stream.id, Uuid::new_v4()).await.unwrap();
    }
    coordinator
        .reactions()
        .react(stream.id, Uuid::new_v4(), ReactionKind::Like)
        .await
        .unwrap();
    coordinator
        .reactions()
        .record_share(stream.id, Uuid::new_v4(), "telegram")
        .await
        .unwrap();
    coordinator
        .cameras()
        .add_camera(stream.id, "Wide", "cam-wide")
        .await
        .unwrap();
    let close = coordinator
        .cameras()
        .add_camera(stream.id, "Close", "cam-close")
        .await
        .unwrap();
    coordinator
        .cameras()
        .switch_primary(stream.id, close.id, &admin)
        .await
        .unwrap();

    let snapshot = coordinator.snapshot(stream.id).await.unwrap();
    assert_eq!(snapshot.active_viewers, 2);
    assert_eq!(snapshot.stream.current_viewer_count, 2);
    assert_eq!(snapshot.stream.likes_count, 1);
    assert_eq!(snapshot.stream.shares_count, 1);
    assert_eq!(snapshot.cameras.len(), 2);
    assert_eq!(snapshot.primary_camera_id, Some(close.id));
}

#[tokio::test]
async fn test_reconcile_live_skips_other_states() {
    let coordinator = coordinator();
    let live = live_stream(&coordinator).await;
    upcoming_stream(&coordinator).await;
    let ended = live_stream(&coordinator).await;
    coordinator.stop(ended.id).await.unwrap();

    let repairs = coordinator.reconcile_live().await.unwrap();
    assert_eq!(repairs.len(), 1);
    assert_eq!(repairs[0].stream_id, live.id);
    assert!(!repairs[0].drifted());
}
