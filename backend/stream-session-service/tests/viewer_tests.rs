//! Viewer session tests
//!
//! Joins are idempotent per user, the cached viewer counter always equals the
//! number of open sessions, and ending a stream closes every session.

mod common;

use futures::future::join_all;
use stream_session_service::SessionError;
use uuid::Uuid;

use common::{coordinator, live_stream, upcoming_stream};

// ============================================
// Join / leave
// ============================================

#[tokio::test]
async fn test_join_twice_returns_same_session() {
    let coordinator = coordinator();
    let stream = live_stream(&coordinator).await;
    let user = Uuid::new_v4();

    let first = coordinator.viewers().join(stream.id, user).await.unwrap();
    let second = coordinator.viewers().join(stream.id, user).await.unwrap();

    assert_eq!(first.id, second.id);
    assert!(second.is_active());
    assert_eq!(coordinator.viewers().active_count(stream.id).await.unwrap(), 1);
    assert_eq!(coordinator.stream(stream.id).await.unwrap().current_viewer_count, 1);
}

#[tokio::test]
async fn test_join_requires_live_stream() {
    let coordinator = coordinator();
    let stream = upcoming_stream(&coordinator).await;

    let err = coordinator
        .viewers()
        .join(stream.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::StreamNotLive(id) if id == stream.id));

    let missing = Uuid::new_v4();
    let err = coordinator.viewers().join(missing, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, SessionError::StreamNotFound(id) if id == missing));
}

#[tokio::test]
async fn test_leave_without_session_is_noop() {
    let coordinator = coordinator();
    let stream = live_stream(&coordinator).await;

    let closed = coordinator
        .viewers()
        .leave(stream.id, Uuid::new_v4())
        .await
        .unwrap();
    assert!(closed.is_none());
    assert_eq!(coordinator.stream(stream.id).await.unwrap().current_viewer_count, 0);
}

#[tokio::test]
async fn test_rejoin_after_leave_opens_new_session() {
    let coordinator = coordinator();
    let stream = live_stream(&coordinator).await;
    let user = Uuid::new_v4();

    let first = coordinator.viewers().join(stream.id, user).await.unwrap();
    let closed = coordinator.viewers().leave(stream.id, user).await.unwrap().unwrap();
    assert_eq!(closed.id, first.id);
    assert!(closed.left_at.unwrap() >= closed.joined_at);

    let second = coordinator.viewers().join(stream.id, user).await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(coordinator.viewers().active_count(stream.id).await.unwrap(), 1);
}

// ============================================
// Concurrency
// ============================================

#[tokio::test]
async fn test_concurrent_joins_and_leaves_keep_count_exact() {
    let coordinator = coordinator();
    let stream = live_stream(&coordinator).await;
    let users: Vec<Uuid> = (0..20).map(|_| Uuid::new_v4()).collect();

    // Every user double-joins at once
    let joins = users
        .iter()
        .chain(users.iter())
        .map(|user| coordinator.viewers().join(stream.id, *user));
    for result in join_all(joins).await {
        result.unwrap();
    }
    assert_eq!(coordinator.viewers().active_count(stream.id).await.unwrap(), 20);

    let leaves = users[..10]
        .iter()
        .map(|user| coordinator.viewers().leave(stream.id, *user));
    for result in join_all(leaves).await {
        assert!(result.unwrap().is_some());
    }

    let stream = coordinator.stream(stream.id).await.unwrap();
    assert_eq!(stream.current_viewer_count, 10);
    assert_eq!(stream.peak_viewer_count, 20);

    let active = coordinator.viewers().active_viewers(stream.id).await.unwrap();
    assert_eq!(active.len(), 10);
    assert!(active.iter().all(|s| users[10..].contains(&s.user_id)));
}

// ============================================
// Stream end
// ============================================

#[tokio::test]
async fn test_stop_closes_every_session() {
    let coordinator = coordinator();
    let stream = live_stream(&coordinator).await;
    for _ in 0..3 {
        coordinator.viewers().join(stream.id, Uuid::new_v4()).await.unwrap();
    }

    let summary = coordinator.stop(stream.id).await.unwrap();
    assert_eq!(summary.sessions_closed, 3);
    assert_eq!(summary.stream.current_viewer_count, 0);
    assert_eq!(summary.stream.peak_viewer_count, 3);
    assert_eq!(coordinator.viewers().active_count(stream.id).await.unwrap(), 0);

    let err = coordinator
        .viewers()
        .join(stream.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::StreamNotLive(id) if id == stream.id));
}
